use nvprep::container::DaemonConfig;
use nvprep::fakes::ScriptedRunner;
use nvprep::packages::PackageInstaller;
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone)]
enum Op {
    Install(Vec<String>),
    Refresh,
}

fn package_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{1,12}"
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => prop::collection::vec(package_name(), 1..4).prop_map(Op::Install),
        1 => Just(Op::Refresh),
    ]
}

proptest! {
    #[test]
    fn test_repeated_installs_refresh_once(lists in prop::collection::vec(prop::collection::vec(package_name(), 1..4), 1..8)) {
        let runner = ScriptedRunner::new();
        let mut installer = PackageInstaller::new(None);

        tokio_test::block_on(async {
            for packages in &lists {
                installer.install(&runner, packages).await.unwrap();
            }
        });

        prop_assert_eq!(runner.count("apt-get update"), 1);
        prop_assert_eq!(runner.count("apt-get install"), lists.len());
        prop_assert!(installer.index_refreshed());
    }

    #[test]
    fn test_installs_never_add_refreshes_after_the_first(ops in prop::collection::vec(op(), 1..12)) {
        let runner = ScriptedRunner::new();
        let mut installer = PackageInstaller::new(None);

        tokio_test::block_on(async {
            for op in &ops {
                match op {
                    Op::Install(packages) => installer.install(&runner, packages).await.unwrap(),
                    Op::Refresh => installer.refresh_index(&runner).await.unwrap(),
                }
            }
        });

        let explicit = ops.iter().filter(|op| matches!(op, Op::Refresh)).count();
        let implicit = usize::from(matches!(ops.first(), Some(Op::Install(_))));
        prop_assert_eq!(runner.count("apt-get update"), explicit + implicit);
    }
}

#[tokio::test]
async fn test_failed_refresh_is_not_repeated_by_later_installs() {
    let runner = ScriptedRunner::new().sequence(
        "apt-get update",
        vec![
            nvprep::fakes::Reply::fail(100, "Temporary failure resolving 'archive.ubuntu.com'"),
            nvprep::fakes::Reply::ok(""),
        ],
    );
    let mut installer = PackageInstaller::new(None);

    for packages in [["dkms"], ["git"], ["curl"]] {
        let packages: Vec<String> = packages.iter().map(|s| s.to_string()).collect();
        assert!(installer.install(&runner, &packages).await.is_err());
    }
    assert!(!installer.index_refreshed());
    assert_eq!(runner.count("apt-get update"), 1);
    assert_eq!(runner.count("apt-get install"), 0);
}

#[tokio::test]
async fn test_explicit_refresh_recovers_after_failed_install_refresh() {
    let runner = ScriptedRunner::new().sequence(
        "apt-get update",
        vec![
            nvprep::fakes::Reply::fail(100, "Temporary failure resolving 'archive.ubuntu.com'"),
            nvprep::fakes::Reply::ok(""),
        ],
    );
    let mut installer = PackageInstaller::new(None);

    assert!(installer.install(&runner, &["dkms".to_string()]).await.is_err());
    installer.refresh_index(&runner).await.unwrap();
    installer.install(&runner, &["dkms".to_string()]).await.unwrap();
    assert!(installer.index_refreshed());
    assert_eq!(runner.count("apt-get update"), 2);
    assert_eq!(runner.count("apt-get install"), 1);
}

#[tokio::test]
async fn test_daemon_config_converges_to_identical_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("daemon.json");
    let config = DaemonConfig::default();

    let mut contents = Vec::new();
    for _ in 0..3 {
        config.converge(&path).await.unwrap();
        contents.push(std::fs::read_to_string(&path).unwrap());
    }
    assert!(contents.windows(2).all(|w| w[0] == w[1]));
}
