//! Line-based keyboard driver, one command per line.

use std::io::BufRead;

use rrcontrol::{Control, InputDriver};
use tracing::{debug, warn};

pub const HELP: &str = "p play/pause | n next | b previous | c cycle source | + / - volume | m mute | s status | r reload | q quit";

/// Maps a typed line to a control. Repeated `+`/`-` count as several
/// encoder detents.
pub fn parse_line(line: &str) -> Option<Control> {
    let line = line.trim();
    if !line.is_empty() && line.chars().all(|c| c == '+') {
        return Some(Control::VolumeChange(line.len() as i32));
    }
    if !line.is_empty() && line.chars().all(|c| c == '-') {
        return Some(Control::VolumeChange(-(line.len() as i32)));
    }

    match line.to_ascii_lowercase().as_str() {
        "p" | "play" | "pause" => Some(Control::PlayPause),
        "n" | "next" => Some(Control::Next),
        "b" | "prev" | "previous" => Some(Control::Previous),
        "c" | "cycle" => Some(Control::CycleSource),
        "m" | "mute" => Some(Control::MuteToggle),
        "s" | "status" => Some(Control::Status),
        "r" | "reload" => Some(Control::ReloadSources),
        "q" | "quit" | "exit" => Some(Control::Quit),
        _ => None,
    }
}

pub struct KeyboardInput<R> {
    reader: R,
}

impl<R: BufRead> KeyboardInput<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> InputDriver for KeyboardInput<R> {
    fn run(&mut self, handler: &mut dyn FnMut(Control) -> bool) {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    debug!("Keyboard input closed");
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to read keyboard input");
                    return;
                }
            }

            if line.trim().is_empty() {
                continue;
            }
            match parse_line(&line) {
                Some(control) => {
                    if !handler(control) {
                        return;
                    }
                }
                None => println!("{HELP}"),
            }
        }
    }
}
