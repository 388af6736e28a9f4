use std::fs::File;
use std::io::{self, BufRead, Write};

use log::{debug, error, info};

use crate::host::Host;
use crate::state::SaveState;

/// Plain stdin/stdout host for running games in a terminal. Saves land
/// next to the working directory as JSON named after the story file.
pub struct TerminalHost;

impl TerminalHost {
    pub fn new() -> TerminalHost {
        TerminalHost
    }

    fn save_path(name: &str) -> String {
        format!("{name}.save.json")
    }
}

impl Default for TerminalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for TerminalHost {
    fn text_out(&mut self, text: &str) {
        print!("{text}");
        io::stdout().flush().ok();
    }

    fn read_input(&mut self) -> String {
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            // Zero bytes means stdin closed; hand back the empty string
            // so the machine can wind down instead of spinning.
            Ok(0) => {
                debug!("EOF on stdin");
                String::new()
            }
            Ok(_) => line,
            Err(e) => {
                error!("Failed to read input: {e}");
                String::new()
            }
        }
    }

    fn play_sound(&mut self, sound_id: u16, effect: u16, volume: u16) {
        debug!("Sound request id={sound_id} effect={effect} volume={volume}");
    }

    fn save(&mut self, state: &SaveState) -> bool {
        let path = Self::save_path(&state.name);
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("Could not create save file {path}: {e}");
                return false;
            }
        };
        match serde_json::to_writer(file, state) {
            Ok(()) => {
                info!("Game saved to {path}");
                true
            }
            Err(e) => {
                error!("Could not encode save state: {e}");
                false
            }
        }
    }

    fn load(&mut self, name: &str) -> Option<SaveState> {
        let path = Self::save_path(name);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                error!("Could not open save file {path}: {e}");
                return None;
            }
        };
        match serde_json::from_reader(file) {
            Ok(state) => {
                info!("Game loaded from {path}");
                Some(state)
            }
            Err(e) => {
                error!("Could not decode save file {path}: {e}");
                None
            }
        }
    }
}
