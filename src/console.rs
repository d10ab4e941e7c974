//! Terminal and OS collaborators.
//!
//! The interpreter core never touches the screen, the keyboard or the shell
//! directly: everything goes through the [`Console`] trait so the cursor
//! tricks (AT, TAB, ATTR, CLS), raw-mode keystrokes (INKEY$), SIGINT and
//! `SYS` stay swappable. [`Term`] is the ANSI terminal implementation used by
//! the binary; tests plug in a capturing console instead.

use std::io::{self, Read, Write};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT into a flag the dispatcher polls between statements.
pub fn install_sigint() {
    let handler = on_sigint as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

pub trait Console {
    /// Program output (PRINT and friends).
    fn write(&mut self, text: &str);

    /// Diagnostics: error messages, TRACE, DUMP, notices.
    fn diag(&mut self, text: &str);

    /// Read one input line, without the trailing newline. `None` at
    /// end of input.
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    /// Block for a single keystroke.
    fn inkey(&mut self) -> u8;

    /// Current cursor column, 0 at the start of a line.
    fn col(&self) -> u16;

    fn row(&self) -> u16;

    fn set_col(&mut self, col: u16);

    fn set_cursor(&mut self, row: u16, col: u16);

    fn cls(&mut self);

    /// Apply a display attribute; false if the name is unknown.
    fn attr(&mut self, name: &str, value: u16) -> bool;

    /// Shell out (the SYS statement).
    fn sys(&mut self, command: &str);

    /// True once after the user interrupted; reading clears the flag.
    fn take_interrupt(&mut self) -> bool {
        false
    }
}

/// ANSI terminal on stdout/stderr.
pub struct Term {
    col: u16,
    row: u16,
}

impl Term {
    pub fn new() -> Self {
        Term { col: 0, row: 0 }
    }

    fn track(&mut self, text: &str) {
        for b in text.bytes() {
            if b == b'\n' {
                self.col = 0;
                self.row += 1;
            } else {
                self.col += 1;
            }
        }
    }
}

impl Console for Term {
    fn write(&mut self, text: &str) {
        self.track(text);
        print!("{}", text);
        let _ = io::stdout().flush();
    }

    fn diag(&mut self, text: &str) {
        eprint!("{}", text);
        let _ = io::stderr().flush();
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        if self.col > 0 {
            self.write("\n");
        }
        self.write(prompt);
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                self.col = 0;
                self.row += 1;
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Some(line)
            }
        }
    }

    fn inkey(&mut self) -> u8 {
        // Drop canonical mode and echo for one read, as a vintage machine
        // would poll its keyboard matrix.
        unsafe {
            let mut prev: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(0, &mut prev) != 0 {
                return 0;
            }
            let mut raw = prev;
            raw.c_lflag &= !(libc::ICANON | libc::ECHO);
            libc::tcsetattr(0, libc::TCSANOW, &raw);
            let mut buf = [0u8; 1];
            let n = io::stdin().read(&mut buf).unwrap_or(0);
            libc::tcsetattr(0, libc::TCSANOW, &prev);
            if n == 0 {
                0
            } else {
                buf[0]
            }
        }
    }

    fn col(&self) -> u16 {
        self.col
    }

    fn row(&self) -> u16 {
        self.row
    }

    fn set_col(&mut self, col: u16) {
        print!("\x1b[{}G", col + 1);
        let _ = io::stdout().flush();
        self.col = col;
    }

    fn set_cursor(&mut self, row: u16, col: u16) {
        print!("\x1b[{};{}f", row + 1, col + 1);
        let _ = io::stdout().flush();
        self.row = row;
        self.col = col;
    }

    fn cls(&mut self) {
        print!("\x1b[2J\x1b[1;1f");
        let _ = io::stdout().flush();
        self.col = 0;
        self.row = 0;
    }

    fn attr(&mut self, name: &str, value: u16) -> bool {
        let v = value & 1;
        let rgb = |bit: u16| if value & bit != 0 { 255 } else { 0 };
        match name {
            "BACK" => print!("\x1b[48;2;{};{};{}m", rgb(4), rgb(2), rgb(1)),
            "BLINK" => print!("\x1b[{}m", 25 - 20 * v),
            "BOLD" => print!("\x1b[{}m", 22 - 21 * v),
            "BRIGHT" => print!("\x1b[{}m", 2 + 20 * v),
            "FORE" => print!("\x1b[38;2;{};{};{}m", rgb(4), rgb(2), rgb(1)),
            "RESET" => print!("\x1b[0m"),
            "REVERSE" => print!("\x1b[{}m", 27 - 20 * v),
            "UNDER" => print!("\x1b[{}m", 24 - 20 * v),
            _ => return false,
        }
        let _ = io::stdout().flush();
        true
    }

    fn sys(&mut self, command: &str) {
        let _ = Command::new("sh").arg("-c").arg(command).status();
    }

    fn take_interrupt(&mut self) -> bool {
        INTERRUPTED.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
pub mod testing {
    //! A console that captures output and serves scripted input.

    use super::Console;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    pub struct TestConsole {
        pub out: Rc<RefCell<String>>,
        pub diags: Rc<RefCell<String>>,
        input: VecDeque<String>,
        keys: VecDeque<u8>,
        col: u16,
        row: u16,
    }

    impl TestConsole {
        pub fn new(input: &[&str]) -> (Self, Rc<RefCell<String>>, Rc<RefCell<String>>) {
            let out = Rc::new(RefCell::new(String::new()));
            let diags = Rc::new(RefCell::new(String::new()));
            let con = TestConsole {
                out: out.clone(),
                diags: diags.clone(),
                input: input.iter().map(|s| s.to_string()).collect(),
                keys: VecDeque::new(),
                col: 0,
                row: 0,
            };
            (con, out, diags)
        }

        pub fn push_key(&mut self, key: u8) {
            self.keys.push_back(key);
        }
    }

    impl Console for TestConsole {
        fn write(&mut self, text: &str) {
            for b in text.bytes() {
                if b == b'\n' {
                    self.col = 0;
                    self.row += 1;
                } else {
                    self.col += 1;
                }
            }
            self.out.borrow_mut().push_str(text);
        }

        fn diag(&mut self, text: &str) {
            self.diags.borrow_mut().push_str(text);
        }

        fn read_line(&mut self, _prompt: &str) -> Option<String> {
            self.input.pop_front()
        }

        fn inkey(&mut self) -> u8 {
            self.keys.pop_front().unwrap_or(0)
        }

        fn col(&self) -> u16 {
            self.col
        }

        fn row(&self) -> u16 {
            self.row
        }

        fn set_col(&mut self, col: u16) {
            // Pad with spaces so captured output stays readable.
            while self.col < col {
                self.out.borrow_mut().push(' ');
                self.col += 1;
            }
        }

        fn set_cursor(&mut self, row: u16, col: u16) {
            self.row = row;
            self.col = col;
        }

        fn cls(&mut self) {
            self.col = 0;
            self.row = 0;
        }

        fn attr(&mut self, name: &str, _value: u16) -> bool {
            matches!(
                name,
                "BACK" | "BLINK" | "BOLD" | "BRIGHT" | "FORE" | "RESET" | "REVERSE" | "UNDER"
            )
        }

        fn sys(&mut self, _command: &str) {}
    }
}
