use std::io::{self, Write};

const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

/// Terminal spinner drawn on stderr while a child process runs.
///
/// Display only: it never influences how or when the process completes.
#[derive(Debug)]
pub struct Spinner {
    label: String,
    frame: usize,
}

impl Spinner {
    pub fn new(label: impl Into<String>) -> Self {
        let spinner = Self {
            label: label.into(),
            frame: 0,
        };
        spinner.draw(FRAMES[0]);
        spinner
    }

    pub fn advance(&mut self) {
        self.frame = (self.frame + 1) % FRAMES.len();
        self.draw(FRAMES[self.frame]);
    }

    pub fn finish(&self, success: bool) {
        let mark = if success { '✓' } else { '✗' };
        self.draw(mark);
        let _ = writeln!(io::stderr());
    }

    pub fn current_frame(&self) -> char {
        FRAMES[self.frame]
    }

    fn draw(&self, mark: char) {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r\x1b[2K{} {}", mark, self.label);
        let _ = stderr.flush();
    }
}
