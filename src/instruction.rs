use std::collections::HashMap;
use std::fmt::Display;
use std::fmt::Error;
use std::fmt::Formatter;

use log::trace;

use crate::machine::Machine;

/// Operand type codes as they appear in the encoding.
pub const OPTYPE_LARGE_CONST: u8 = 0x00;
pub const OPTYPE_SMALL_CONST: u8 = 0x01;
pub const OPTYPE_VARIABLE: u8 = 0x02;
pub const OPTYPE_OMITTED: u8 = 0x03;

const MAX_OPERANDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionForm {
    Long,
    Short,
    Variable,
}

/// A decoded instruction: the raw opcode byte, the operand values with
/// variable references already read, and the total length of the opcode,
/// type and operand bytes.
///
/// Store bytes, branch descriptors and inline strings are not part of the
/// length; the dispatcher knows each opcode's shape and reads those from
/// `pc + len` itself.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub code: u8,
    pub operands: Vec<u16>,
    pub len: u32,
    pub form: InstructionForm,
}

impl Machine {
    /// Decode the instruction at the current program counter. Reading a
    /// variable-typed operand goes through the variable model, so a
    /// variable 0 operand pops the stack here.
    pub fn decode_instruction(&mut self) -> Result<Instruction, String> {
        let code = self.read_byte(self.pc)?;

        // Variable form: $11 in the top bits, operand types in the next
        // byte, two bits each, most significant first.
        if code & 0xC0 == 0xC0 {
            let types = self.read_byte(self.pc + 1)?;
            let mut inst = Instruction {
                code,
                operands: Vec::new(),
                len: 2,
                form: InstructionForm::Variable,
            };
            for i in 0..MAX_OPERANDS {
                let op_type = (types >> (6 - 2 * i)) & 0x03;
                if op_type == OPTYPE_OMITTED {
                    break;
                }
                let (value, size) = self.fetch_operand(op_type, self.pc + inst.len)?;
                inst.operands.push(value);
                inst.len += size;
            }
            trace!("Decode var: {:02x} types {:02x}", code, types);
            return Ok(inst);
        }

        // Short form: $10 in the top bits, single operand type in bits 5
        // and 4. Type omitted makes it a 0OP instruction.
        if code & 0xC0 == 0x80 {
            let op_type = (code >> 4) & 0x03;
            let mut inst = Instruction {
                code,
                operands: Vec::new(),
                len: 1,
                form: InstructionForm::Short,
            };
            if op_type != OPTYPE_OMITTED {
                let (value, size) = self.fetch_operand(op_type, self.pc + 1)?;
                inst.operands.push(value);
                inst.len += size;
            }
            trace!("Decode short: {:02x} type {:02x}", code, op_type);
            return Ok(inst);
        }

        // Long form otherwise, always 2OP. Bits 6 and 5 pick each
        // operand's type: clear for small constant, set for variable.
        let type1 = if code & 0x40 != 0 { OPTYPE_VARIABLE } else { OPTYPE_SMALL_CONST };
        let type2 = if code & 0x20 != 0 { OPTYPE_VARIABLE } else { OPTYPE_SMALL_CONST };
        trace!("Decode long: {:02x} types {} {}", code, type1, type2);

        let (op1, _) = self.fetch_operand(type1, self.pc + 1)?;
        let (op2, _) = self.fetch_operand(type2, self.pc + 2)?;
        Ok(Instruction {
            code,
            operands: vec![op1, op2],
            len: 3,
            form: InstructionForm::Long,
        })
    }

    /// Fetch one operand, returning its value and encoded size in bytes.
    fn fetch_operand(&mut self, op_type: u8, addr: u32) -> Result<(u16, u32), String> {
        match op_type {
            OPTYPE_LARGE_CONST => Ok((self.read_word(addr)?, 2)),
            OPTYPE_SMALL_CONST => Ok((self.read_byte(addr)? as u16, 1)),
            OPTYPE_VARIABLE => {
                let var = self.read_byte(addr)?;
                Ok((self.get_var(var)?, 1))
            }
            _ => Err(format!("Invalid operand type {:02x}", op_type)),
        }
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(
            f,
            "{} (code={:02x}, operands={:?}, len={}, form={:?})",
            opcode_name(self.code),
            self.code,
            self.operands,
            self.len,
            self.form
        )
    }
}

/// Mnemonic for an opcode byte, for traces and trap reports. Operand-type
/// variants of 1OP and 2OP instructions all map to the same name.
pub fn opcode_name(code: u8) -> &'static str {
    OPCODE_NAMES.get(&code).copied().unwrap_or("???")
}

lazy_static! {
    static ref OPCODE_NAMES: HashMap<u8, &'static str> = {
        let mut m = HashMap::new();

        // 0OP (short form, operand type omitted)
        m.insert(0xB0, "rtrue");
        m.insert(0xB1, "rfalse");
        m.insert(0xB2, "print");
        m.insert(0xB3, "print_ret");
        m.insert(0xB4, "nop");
        m.insert(0xB5, "save");
        m.insert(0xB6, "restore");
        m.insert(0xB7, "restart");
        m.insert(0xB8, "ret_popped");
        m.insert(0xB9, "pop");
        m.insert(0xBA, "quit");
        m.insert(0xBB, "new_line");
        m.insert(0xBC, "show_status");
        m.insert(0xBD, "verify");

        // 1OP: large constant (8x), small constant (9x), variable (Ax)
        let one_op = [
            "jz", "get_sibling", "get_child", "get_parent", "get_prop_len",
            "inc", "dec", "print_addr", "call_1s", "remove_obj", "print_obj",
            "ret", "jump", "print_paddr", "load", "not",
        ];
        for (n, name) in one_op.iter().enumerate() {
            m.insert(0x80 + n as u8, *name);
            m.insert(0x90 + n as u8, *name);
            m.insert(0xA0 + n as u8, *name);
        }

        // 2OP: the four long-form type variants plus the variable form
        let two_op = [
            "je", "jl", "jg", "dec_chk", "inc_chk", "jin", "test", "or",
            "and", "test_attr", "set_attr", "clear_attr", "store",
            "insert_obj", "loadw", "loadb", "get_prop", "get_prop_addr",
            "get_next_prop", "add", "sub", "mul", "div", "mod",
        ];
        for (i, name) in two_op.iter().enumerate() {
            let n = i as u8 + 1;
            m.insert(n, *name);
            m.insert(0x20 + n, *name);
            m.insert(0x40 + n, *name);
            m.insert(0x60 + n, *name);
            m.insert(0xC0 + n, *name);
        }

        // VAR form
        m.insert(0xE0, "call");
        m.insert(0xE1, "storew");
        m.insert(0xE2, "storeb");
        m.insert(0xE3, "put_prop");
        m.insert(0xE4, "sread");
        m.insert(0xE5, "print_char");
        m.insert(0xE6, "print_num");
        m.insert(0xE7, "random");
        m.insert(0xE8, "push");
        m.insert(0xE9, "pull");
        m.insert(0xEA, "split_window");
        m.insert(0xEB, "set_window");
        m.insert(0xF3, "output_stream");
        m.insert(0xF4, "input_stream");
        m.insert(0xF5, "sound_effect");

        m
    };
}
