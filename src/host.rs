//! The boundary between the interpreter and whatever is embedding it.
//!
//! The machine holds exactly one host handle and reaches the outside world
//! only through these five operations. Terminal rendering, line editing,
//! persistence formats and web bridges all live on the far side.

use crate::state::SaveState;

pub trait Host {
    /// Emit `text` verbatim. No reordering, no implicit newline.
    fn text_out(&mut self, text: &str);

    /// Block until a line of input is available and return it including
    /// its trailing newline. An empty string signals end of input.
    fn read_input(&mut self) -> String;

    /// Sound effect request. Hosts without audio ignore it.
    fn play_sound(&mut self, sound_id: u16, effect: u16, volume: u16);

    /// Persist a snapshot of the machine. Returns true on success.
    fn save(&mut self, state: &SaveState) -> bool;

    /// Produce the previously saved snapshot for `name`, if one exists
    /// and decodes cleanly.
    fn load(&mut self, name: &str) -> Option<SaveState>;
}
