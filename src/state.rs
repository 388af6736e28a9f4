use serde::{Deserialize, Serialize};

use crate::frame::CallFrame;
use crate::zobject::ZObject;

/// Snapshot of everything that changes while a game runs.
///
/// A snapshot owns deep copies, so the machine that produced it keeps
/// running untouched. The format must round-trip exactly: a restored
/// machine replays the same bytes of output as the one that saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveState {
    pub pc: u32,
    pub call_stack: Vec<CallFrame>,
    pub mem: Vec<u8>,
    pub name: String,
    pub objects: Vec<ZObject>,
}
