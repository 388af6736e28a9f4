use log::{debug, info};

use crate::dictionary::Dictionary;
use crate::frame::{CallFrame, MAX_LOCALS};
use crate::header::Header;
use crate::host::Host;
use crate::state::SaveState;
use crate::text;
use crate::zbytes;
use crate::zobject::{self, ZObject};
use crate::zrand::ZRand;

/// Prefix marking a line of input as an out-of-band directive for the
/// interpreter rather than the game.
const SYSTEM_CMD_PREFIX: char = '/';

/// The abbreviation table always has room for 96 strings (3 banks of 32).
const ABBREV_COUNT: u32 = 96;

/// Why the run loop stopped. The embedding host decides what each one
/// means for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Load,
    Restart,
}

impl ExitReason {
    /// Conventional numeric exit codes: 0 is reserved for a normal exit.
    pub fn code(self) -> i32 {
        match self {
            ExitReason::Quit => 1,
            ExitReason::Load => 2,
            ExitReason::Restart => 3,
        }
    }
}

/// The state of one Z-machine: the story image, the parsed tables built
/// from it at load time, and everything that changes while it runs.
pub struct Machine {
    pub(crate) host: Box<dyn Host>,
    pub name: String,
    pub mem: Vec<u8>,
    /// Pristine copy of the image, for `verify` and for restarts.
    pub(crate) original: Vec<u8>,
    pub pc: u32,
    pub call_stack: Vec<CallFrame>,
    pub header: Header,
    pub prop_defaults: Vec<u16>,
    pub objects: Vec<ZObject>,
    pub abbrevs: Vec<String>,
    pub dict: Dictionary,
    pub(crate) rng: ZRand,
    pub(crate) exit: Option<ExitReason>,
}

impl Machine {
    /// Build a machine from a story image. All tables are parsed here,
    /// once; a malformed image fails before any execution begins.
    pub fn new(data: Vec<u8>, name: &str, host: Box<dyn Host>) -> Result<Machine, String> {
        let header = Header::parse(&data)?;

        // Abbreviations first: object names and dictionary words may
        // reference them.
        let abbrevs = load_abbreviations(&data, &header);
        let (prop_defaults, objects) = zobject::parse_object_table(&data, &header, &abbrevs)?;
        let dict = Dictionary::parse(&data, &header, &abbrevs)?;

        let mut machine = Machine {
            host,
            name: name.to_string(),
            pc: header.initial_pc as u32,
            original: data.clone(),
            mem: data,
            call_stack: Vec::new(),
            header,
            prop_defaults,
            objects,
            abbrevs,
            dict,
            rng: ZRand::new(),
            exit: None,
        };

        // The initial frame for main. It has no return address; returning
        // from it ends the program.
        machine.call_stack.push(CallFrame::new());

        info!(
            "Machine '{}' initialized: {} bytes, {} objects, {} dictionary entries, PC {:05x}",
            machine.name,
            machine.mem.len(),
            machine.objects.len(),
            machine.dict.entries.len(),
            machine.pc
        );

        Ok(machine)
    }

    /// Execute until the game quits or asks the host for something. Fatal
    /// runtime traps come back as `Err` with a stack trace attached.
    pub fn run(&mut self) -> Result<ExitReason, String> {
        debug!("Starting the main execution loop");
        loop {
            self.step_traced()?;
            if let Some(reason) = self.exit.take() {
                debug!("Run loop exiting: {:?}", reason);
                return Ok(reason);
            }
        }
    }

    /// Like `run`, but stop after `max_instructions` steps. Returns None
    /// when the limit was hit first.
    pub fn run_with_limit(&mut self, max_instructions: u64) -> Result<Option<ExitReason>, String> {
        for _ in 0..max_instructions {
            self.step_traced()?;
            if let Some(reason) = self.exit.take() {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    fn step_traced(&mut self) -> Result<(), String> {
        let pc = self.pc;
        self.step().map_err(|e| self.trap_report(pc, &e))
    }

    /// Format a fatal trap: the error, where it happened and the return
    /// address of every live frame.
    fn trap_report(&self, pc: u32, err: &str) -> String {
        let mut report = format!("Runtime error at {:05x}: {}\nCall stack:\n", pc, err);
        for (i, frame) in self.call_stack.iter().enumerate().rev() {
            report.push_str(&format!(
                " - frame {}: return to {:05x}, stack depth {}\n",
                i,
                frame.return_addr,
                frame.stack.len()
            ));
        }
        report
    }

    // ----- memory -----

    pub fn read_byte(&self, addr: u32) -> Result<u8, String> {
        self.mem.get(addr as usize).copied().ok_or_else(|| {
            format!(
                "Byte read out of range at {:05x} (image is {} bytes)",
                addr,
                self.mem.len()
            )
        })
    }

    pub fn read_word(&self, addr: u32) -> Result<u16, String> {
        zbytes::read_word(&self.mem, addr)
    }

    /// Writes are confined to dynamic memory; the region at and above the
    /// static-memory base is read-only for the program.
    pub fn write_byte(&mut self, addr: u32, value: u8) -> Result<(), String> {
        if addr >= self.header.static_mem as u32 {
            return Err(format!(
                "Write to read-only memory at {:05x} (static base {:04x})",
                addr, self.header.static_mem
            ));
        }
        match self.mem.get_mut(addr as usize) {
            Some(b) => {
                *b = value;
                Ok(())
            }
            None => Err(format!("Byte write out of range at {:05x}", addr)),
        }
    }

    pub fn write_word(&mut self, addr: u32, value: u16) -> Result<(), String> {
        self.write_byte(addr, (value >> 8) as u8)?;
        self.write_byte(addr + 1, (value & 0xFF) as u8)
    }

    // ----- variables -----

    pub(crate) fn frame(&self) -> Result<&CallFrame, String> {
        self.call_stack.last().ok_or_else(|| "Call frame underflow".to_string())
    }

    pub(crate) fn frame_mut(&mut self) -> Result<&mut CallFrame, String> {
        self.call_stack.last_mut().ok_or_else(|| "Call frame underflow".to_string())
    }

    /// Read a variable: 0 pops the operand stack, 1..15 are the current
    /// frame's locals, 16..255 are globals.
    pub fn get_var(&mut self, var: u8) -> Result<u16, String> {
        match var {
            0 => Ok(self.frame_mut()?.pop()),
            1..=15 => Ok(self.frame()?.locals[var as usize - 1]),
            _ => self.read_word(self.global_addr(var)),
        }
    }

    /// Write a variable: 0 pushes onto the operand stack.
    pub fn set_var(&mut self, var: u8, value: u16) -> Result<(), String> {
        match var {
            0 => {
                self.frame_mut()?.push(value);
                Ok(())
            }
            1..=15 => {
                self.frame_mut()?.locals[var as usize - 1] = value;
                Ok(())
            }
            _ => {
                let addr = self.global_addr(var);
                self.write_word(addr, value)
            }
        }
    }

    /// Like `set_var`, except that variable 0 replaces the stack top
    /// instead of pushing. `store` and `pull` want this.
    pub fn set_var_in_place(&mut self, var: u8, value: u16) -> Result<(), String> {
        if var == 0 {
            self.frame_mut()?.set_top(value);
            return Ok(());
        }
        self.set_var(var, value)
    }

    /// Add `delta` to a variable with 16-bit signed wraparound and return
    /// the new value. Variable 0 updates the stack top without popping.
    pub fn add_to_var(&mut self, var: u8, delta: i16) -> Result<i16, String> {
        match var {
            0 => {
                let frame = self.frame_mut()?;
                let new = (frame.peek() as i16).wrapping_add(delta);
                frame.set_top(new as u16);
                Ok(new)
            }
            1..=15 => {
                let frame = self.frame_mut()?;
                let new = (frame.locals[var as usize - 1] as i16).wrapping_add(delta);
                frame.locals[var as usize - 1] = new as u16;
                Ok(new)
            }
            _ => {
                let addr = self.global_addr(var);
                let new = (self.read_word(addr)? as i16).wrapping_add(delta);
                self.write_word(addr, new as u16)?;
                Ok(new)
            }
        }
    }

    fn global_addr(&self, var: u8) -> u32 {
        self.header.globals as u32 + (var as u32 - 16) * 2
    }

    // ----- objects -----

    pub fn object(&self, num: u8) -> Result<&ZObject, String> {
        if num == zobject::NULL_OBJECT || num as usize > self.objects.len() {
            return Err(format!("Attempt to access invalid object {}", num));
        }
        Ok(&self.objects[num as usize - 1])
    }

    pub fn object_mut(&mut self, num: u8) -> Result<&mut ZObject, String> {
        if num == zobject::NULL_OBJECT || num as usize > self.objects.len() {
            return Err(format!("Attempt to access invalid object {}", num));
        }
        Ok(&mut self.objects[num as usize - 1])
    }

    /// Set a property on the parsed object and mirror the data bytes into
    /// the image, so that addresses handed out by `get_prop_addr` stay
    /// coherent. Setting a property the object lacks is a logged no-op.
    pub fn put_prop(&mut self, obj: u8, prop: u8, value: u16) -> Result<(), String> {
        match self.object_mut(obj)?.put_prop(prop, value) {
            Some((addr, 1)) => self.write_byte(addr, (value & 0xFF) as u8),
            Some((addr, _)) => self.write_word(addr, value),
            None => {
                debug!("put_prop: object {} has no settable property {}", obj, prop);
                Ok(())
            }
        }
    }

    // ----- control flow -----

    /// The branch protocol shared by every conditional instruction. The
    /// descriptor lives at `pc + inst_len`: bit 7 is the sense, bit 6
    /// selects a 6-bit unsigned or 14-bit signed offset. Offsets 0 and 1
    /// mean return false or true, and only when the branch is taken.
    pub(crate) fn branch(&mut self, inst_len: u32, condition: bool) -> Result<(), String> {
        let info = self.read_byte(self.pc + inst_len)?;
        let branch_on_true = info & 0x80 != 0;

        let (offset, branch_len): (i16, u32) = if info & 0x40 != 0 {
            ((info & 0x3F) as i16, 1)
        } else {
            let next = self.read_byte(self.pc + inst_len + 1)?;
            let raw = (((info & 0x3F) as u16) << 8) | next as u16;
            (zbytes::sign_extend_14(raw), 2)
        };

        debug!(
            " - branch on_true={} condition={} (info {:02x}) offset {}",
            branch_on_true, condition, info, offset
        );

        if condition == branch_on_true {
            match offset {
                0 => return self.return_value(0),
                1 => return self.return_value(1),
                _ => {}
            }
            self.pc = (self.pc as i64 + inst_len as i64 + branch_len as i64 + offset as i64 - 2)
                as u32;
            debug!("   -> branching to {:05x}", self.pc);
        } else {
            self.pc += inst_len + branch_len;
        }
        Ok(())
    }

    /// Call the routine at packed address `packed`. A packed address of 0
    /// stores false and carries on. The new frame's return address is the
    /// store byte right after the call instruction.
    pub(crate) fn call_routine(
        &mut self,
        packed: u16,
        args: &[u16],
        inst_len: u32,
    ) -> Result<(), String> {
        let routine_addr = zbytes::packed_address(packed);
        if routine_addr == 0 {
            debug!(" - call to routine 0, storing false");
            let dest = self.read_byte(self.pc + inst_len)?;
            self.set_var(dest, 0)?;
            self.pc += inst_len + 1;
            return Ok(());
        }

        let num_locals = self.read_byte(routine_addr)? as usize;
        if num_locals > MAX_LOCALS {
            return Err(format!(
                "Routine at {:05x} declares {} locals, the limit is {}",
                routine_addr, num_locals, MAX_LOCALS
            ));
        }
        debug!(" - call to {:05x} with {} locals", routine_addr, num_locals);

        let mut frame = CallFrame::new();
        frame.return_addr = self.pc + inst_len;
        // Locals seed from the routine header, then arguments overwrite
        // the leading ones. Slots past num_locals stay untouched.
        for i in 0..num_locals {
            frame.locals[i] = self.read_word(routine_addr + 1 + 2 * i as u32)?;
        }
        for (i, &arg) in args.iter().take(num_locals).enumerate() {
            frame.locals[i] = arg;
        }

        self.call_stack.push(frame);
        self.pc = routine_addr + 1 + 2 * num_locals as u32;
        Ok(())
    }

    /// Close the current frame and hand `value` back through the store
    /// byte at the return address. Returning from the bottom frame ends
    /// the program.
    pub(crate) fn return_value(&mut self, value: u16) -> Result<(), String> {
        let frame = self
            .call_stack
            .pop()
            .ok_or_else(|| "Call frame underflow".to_string())?;
        if self.call_stack.is_empty() {
            debug!("Return from the bottom frame, program over");
            self.exit = Some(ExitReason::Quit);
            return Ok(());
        }
        self.pc = frame.return_addr;
        let dest = self.read_byte(self.pc)?;
        self.pc += 1;
        self.set_var(dest, value)
    }

    // ----- text and input -----

    pub(crate) fn print(&mut self, s: &str) {
        self.host.text_out(s);
    }

    /// Decode the packed string at `addr` with this machine's
    /// abbreviations. Returns the text and the number of words read.
    pub(crate) fn decode_at(&self, addr: u32) -> Result<(String, usize), String> {
        text::decode_string(&self.mem, addr, &self.abbrevs)
    }

    /// Fetch one line from the host. Handles end of input and the
    /// out-of-band system commands; those come back as an empty line so
    /// the reader tokenizes nothing.
    pub(crate) fn read_line(&mut self) -> String {
        let input = self.host.read_input();
        if input.is_empty() {
            debug!("End of input from host, quitting");
            self.exit = Some(ExitReason::Quit);
            return String::new();
        }
        if input.starts_with(SYSTEM_CMD_PREFIX) {
            let cmd = input[1..].trim().to_lowercase();
            debug!("System command received: {}", cmd);
            match cmd.as_str() {
                "quit" | "exit" => self.exit = Some(ExitReason::Quit),
                "restart" => self.exit = Some(ExitReason::Restart),
                "load" => self.exit = Some(ExitReason::Load),
                "save" => {
                    let state = self.save_state();
                    if self.host.save(&state) {
                        self.print("Game saved successfully.\n");
                    } else {
                        self.print("Failed to save game.\n");
                    }
                }
                _ => debug!("Unknown system command: {}", cmd),
            }
            return String::new();
        }
        input
    }

    /// The read opcode: copy a line into the text buffer, tokenize it and
    /// fill the parse buffer.
    pub(crate) fn do_sread(&mut self, text_addr: u16, parse_addr: u16) -> Result<(), String> {
        let text_addr = text_addr as u32;
        let parse_addr = parse_addr as u32;

        let max_len = self.read_byte(text_addr)? as usize;
        if max_len == 0 {
            return Err("sread into a zero-length text buffer".to_string());
        }

        let line = self.read_line();
        let line = line.trim_end_matches(|c| c == '\r' || c == '\n').to_lowercase();
        // ZSCII input is plain ASCII; anything else would mangle the
        // byte-per-character buffer.
        let line: String = line.chars().filter(char::is_ascii).take(max_len - 1).collect();
        debug!("sread line: '{}'", line);

        for (i, b) in line.bytes().enumerate() {
            self.write_byte(text_addr + 1 + i as u32, b)?;
        }
        self.write_byte(text_addr + 1 + line.len() as u32, 0)?;

        let tokens = self.tokenize(&line);
        let max_tokens = self.read_byte(parse_addr)? as usize;
        let count = tokens.len().min(max_tokens);
        self.write_byte(parse_addr + 1, count as u8)?;

        for (i, token) in tokens.iter().take(count).enumerate() {
            let entry = parse_addr + 2 + i as u32 * 4;
            let hit = self.dict.lookup(&token.text);
            debug!(
                " - token '{}' at {} -> dict {:04x}",
                token.text, token.pos, hit.addr
            );
            self.write_word(entry, hit.addr)?;
            self.write_byte(entry + 2, token.text.len() as u8)?;
            self.write_byte(entry + 3, token.pos)?;
        }
        Ok(())
    }

    /// Split a line the way the game expects: spaces end words without
    /// becoming tokens, dictionary separators end words and stand alone
    /// as tokens. Positions are 1-based offsets into the text buffer.
    fn tokenize(&self, line: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut word_start = 0usize;

        for (i, c) in line.char_indices() {
            if c == ' ' {
                if !word.is_empty() {
                    tokens.push(Token { text: std::mem::take(&mut word), pos: (word_start + 1) as u8 });
                }
            } else if self.dict.is_separator(c) {
                if !word.is_empty() {
                    tokens.push(Token { text: std::mem::take(&mut word), pos: (word_start + 1) as u8 });
                }
                tokens.push(Token { text: c.to_string(), pos: (i + 1) as u8 });
            } else {
                if word.is_empty() {
                    word_start = i;
                }
                word.push(c);
            }
        }
        if !word.is_empty() {
            tokens.push(Token { text: word, pos: (word_start + 1) as u8 });
        }
        tokens
    }

    /// One-line status rendering through the host output path, driven by
    /// the conventional globals: 16 holds the location object, 17 the
    /// score, 18 the turn count.
    pub(crate) fn show_status(&mut self) -> Result<(), String> {
        if !self.header.status_line {
            return Ok(());
        }
        let location = self.get_var(16)?;
        let score = self.get_var(17)? as i16;
        let turns = self.get_var(18)?;
        let place = if location != 0 && location as usize <= self.objects.len() {
            self.object(location as u8)?.name.clone()
        } else {
            String::new()
        };
        self.print(&format!("[ {}  score: {}  turns: {} ]\n", place, score, turns));
        Ok(())
    }

    /// Sum the pristine image from 0x40 up to the header's file length
    /// and compare against the header checksum.
    pub(crate) fn verify_checksum(&self) -> bool {
        let end = (self.header.file_len as usize).min(self.original.len());
        let mut sum = 0u16;
        for &b in &self.original[0x40.min(end)..end] {
            sum = sum.wrapping_add(b as u16);
        }
        let ok = sum == self.header.checksum;
        debug!(
            "Checksum {:04x} computed vs {:04x} in header: {}",
            sum, self.header.checksum, ok
        );
        ok
    }

    // ----- snapshots -----

    /// Deep-copy everything a restore needs. The machine keeps running
    /// after taking one.
    pub fn save_state(&self) -> SaveState {
        SaveState {
            pc: self.pc,
            call_stack: self.call_stack.clone(),
            mem: self.mem.clone(),
            name: self.name.clone(),
            objects: self.objects.clone(),
        }
    }

    /// Install a snapshot atomically in place. Static memory is identical
    /// across snapshots of the same story, so the parsed dictionary and
    /// abbreviations stay valid.
    pub fn replace_state(&mut self, state: &SaveState) {
        self.pc = state.pc;
        self.call_stack = state.call_stack.clone();
        self.mem = state.mem.clone();
        self.name = state.name.clone();
        self.objects = state.objects.clone();
    }
}

struct Token {
    text: String,
    pos: u8,
}

fn load_abbreviations(mem: &[u8], header: &Header) -> Vec<String> {
    if header.abbrev_table == 0 {
        return vec![String::new(); ABBREV_COUNT as usize];
    }
    let mut abbrevs = Vec::with_capacity(ABBREV_COUNT as usize);
    for i in 0..ABBREV_COUNT {
        let entry = header.abbrev_table as u32 + i * 2;
        // Table entries are word addresses. Abbreviations cannot nest, so
        // they decode against an empty table.
        let s = match zbytes::read_word(mem, entry) {
            Ok(word_addr) => match text::decode_string(mem, word_addr as u32 * 2, &[]) {
                Ok((s, _)) => s,
                Err(e) => {
                    debug!("Abbreviation {} failed to decode: {}", i, e);
                    String::new()
                }
            },
            Err(e) => {
                debug!("Abbreviation table entry {} unreadable: {}", i, e);
                String::new()
            }
        };
        abbrevs.push(s);
    }
    abbrevs
}
