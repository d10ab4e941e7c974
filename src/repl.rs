//! The read-edit-execute loop.
//!
//! A line starting with an integer literal edits the stored program; any
//! other line executes immediately as a transient line staged in the OBJ
//! buffer. The same path serves the interactive prompt, MERGE/LOAD feeds
//! and the startup file.

use crate::error::Error;
use crate::ram::NIL;
use crate::runtime::Runtime;
use crate::token::CODE_INTLIT;

impl Runtime {
    /// Interactive loop; returns on BYE or end of input. An interrupt while
    /// reading cancels the line instead of ending the session.
    pub fn repl(&mut self) {
        while !self.bye {
            let line = match self.console.read_line(">") {
                Some(line) => line,
                None => {
                    if self.console.take_interrupt() {
                        continue;
                    }
                    break;
                }
            };
            self.handle_line(&line);
        }
    }

    /// Tokenize one text line, then either edit the program or execute it.
    /// Errors are reported here so a feed can keep going.
    pub fn handle_line(&mut self, text: &str) {
        let buf0 = self.bufs[0];
        self.load_buffer(buf0, text);
        self.reset_volatile();
        if let Err(e) = self.tokenize() {
            self.report(e);
            return;
        }
        if self.ram.byte(self.obj + 1) == CODE_INTLIT {
            if let Err(e) = self.prog_edit() {
                self.report(e);
            }
        } else {
            self.ip0 = self.obj;
            self.ip = self.obj + 1;
            self.ipn = NIL;
            self.continue_exec();
        }
    }

    /// Feed a whole file, then RUN it. False when the file cannot be read.
    pub fn load_and_run(&mut self, path: &str) -> bool {
        if self.merge_feed(path).is_err() {
            self.report(Error::File);
            return false;
        }
        self.prog_changed = false;
        self.reset_variables();
        self.ip0 = self.pp0;
        self.instr_line();
        self.continue_exec();
        true
    }

    fn report(&mut self, e: Error) {
        self.console.diag(&format!("{}\n", e));
    }
}
