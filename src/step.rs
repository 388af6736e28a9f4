use log::debug;

use crate::instruction::{opcode_name, Instruction};
use crate::machine::{ExitReason, Machine};
use crate::text;
use crate::zbytes;
use crate::zobject;

/// Pull operand `i`, trapping when the encoding supplied too few.
fn operand(inst: &Instruction, i: usize) -> Result<u16, String> {
    inst.operands.get(i).copied().ok_or_else(|| {
        format!(
            "{} is missing operand {} (got {})",
            opcode_name(inst.code),
            i + 1,
            inst.operands.len()
        )
    })
}

/// Narrow an operand to an object number. Version 3 objects are bytes;
/// anything wider is a program error.
fn obj_num(value: u16) -> Result<u8, String> {
    u8::try_from(value).map_err(|_| format!("Object number {} out of range", value))
}

/// Narrow an operand naming a variable.
fn var_num(value: u16) -> Result<u8, String> {
    u8::try_from(value).map_err(|_| format!("Variable number {} out of range", value))
}

impl Machine {
    /// Decode and execute the instruction at the program counter.
    ///
    /// Every encoding alias of an instruction lands on the same arm: the
    /// long form's four operand-type variants, the short form's three,
    /// and the variable form's 2OP subclass.
    pub fn step(&mut self) -> Result<(), String> {
        let pc = self.pc;
        let inst = self.decode_instruction()?;
        debug!("{:05x}: {}", pc, inst);

        match inst.code {
            // ---- 0OP ----

            // rtrue / rfalse
            0xB0 => self.return_value(1),
            0xB1 => self.return_value(0),

            // print: inline string follows the opcode byte
            0xB2 => {
                let (s, words) = self.decode_at(self.pc + 1)?;
                self.print(&s);
                self.pc += 1 + 2 * words as u32;
                Ok(())
            }

            // print_ret: inline string, newline, return true
            0xB3 => {
                let (s, _) = self.decode_at(self.pc + 1)?;
                self.print(&s);
                self.print("\n");
                self.return_value(1)
            }

            // nop
            0xB4 => {
                self.pc += inst.len;
                Ok(())
            }

            // save: snapshot, hand to the host, branch on success
            0xB5 => {
                let state = self.save_state();
                let ok = self.host.save(&state);
                self.branch(inst.len, ok)
            }

            // restore: ask the host for a snapshot; a hit replaces the
            // whole state, a miss branches false
            0xB6 => {
                let name = self.name.clone();
                match self.host.load(&name) {
                    Some(state) => {
                        self.replace_state(&state);
                        Ok(())
                    }
                    None => self.branch(inst.len, false),
                }
            }

            // restart
            0xB7 => {
                self.exit = Some(ExitReason::Restart);
                self.pc += inst.len;
                Ok(())
            }

            // ret_popped
            0xB8 => {
                let value = self.frame_mut()?.pop();
                self.return_value(value)
            }

            // pop
            0xB9 => {
                self.frame_mut()?.pop();
                self.pc += inst.len;
                Ok(())
            }

            // quit
            0xBA => {
                debug!("quit instruction, leaving the run loop");
                self.exit = Some(ExitReason::Quit);
                Ok(())
            }

            // new_line
            0xBB => {
                self.print("\n");
                self.pc += inst.len;
                Ok(())
            }

            // show_status
            0xBC => {
                self.show_status()?;
                self.pc += inst.len;
                Ok(())
            }

            // verify
            0xBD => {
                let ok = self.verify_checksum();
                self.branch(inst.len, ok)
            }

            // ---- 1OP ----

            // jz
            0x80 | 0x90 | 0xA0 => {
                let value = operand(&inst, 0)?;
                self.branch(inst.len, value == 0)
            }

            // get_sibling: store, then branch when non-zero. The branch
            // descriptor sits past the store byte, hence inst.len + 1.
            0x81 | 0x91 | 0xA1 => {
                let sibling = self.object(obj_num(operand(&inst, 0)?)?)?.sibling;
                let dest = self.read_byte(self.pc + inst.len)?;
                self.set_var(dest, sibling as u16)?;
                self.branch(inst.len + 1, sibling != zobject::NULL_OBJECT)
            }

            // get_child: store, then branch when non-zero
            0x82 | 0x92 | 0xA2 => {
                let child = self.object(obj_num(operand(&inst, 0)?)?)?.child;
                let dest = self.read_byte(self.pc + inst.len)?;
                self.set_var(dest, child as u16)?;
                self.branch(inst.len + 1, child != zobject::NULL_OBJECT)
            }

            // get_parent: store only, no branch
            0x83 | 0x93 | 0xA3 => {
                let parent = self.object(obj_num(operand(&inst, 0)?)?)?.parent;
                self.store_result(inst.len, parent as u16)
            }

            // get_prop_len: size of the property whose data lives at the
            // operand address; 0 stays 0
            0x84 | 0x94 | 0xA4 => {
                let prop_addr = operand(&inst, 0)?;
                let len = if prop_addr == 0 {
                    0
                } else {
                    let size_byte = self.read_byte(prop_addr as u32 - 1)?;
                    zobject::prop_size_number(size_byte).1 as u16
                };
                self.store_result(inst.len, len)
            }

            // inc / dec
            0x85 | 0x95 | 0xA5 => {
                self.add_to_var(var_num(operand(&inst, 0)?)?, 1)?;
                self.pc += inst.len;
                Ok(())
            }
            0x86 | 0x96 | 0xA6 => {
                self.add_to_var(var_num(operand(&inst, 0)?)?, -1)?;
                self.pc += inst.len;
                Ok(())
            }

            // print_addr
            0x87 | 0x97 | 0xA7 => {
                let (s, _) = self.decode_at(operand(&inst, 0)? as u32)?;
                self.print(&s);
                self.pc += inst.len;
                Ok(())
            }

            // remove_obj
            0x89 | 0x99 | 0xA9 => {
                let num = obj_num(operand(&inst, 0)?)?;
                zobject::remove_from_parent(&mut self.objects, num)?;
                self.pc += inst.len;
                Ok(())
            }

            // print_obj: the object's short name
            0x8A | 0x9A | 0xAA => {
                let name = self.object(obj_num(operand(&inst, 0)?)?)?.name.clone();
                self.print(&name);
                self.pc += inst.len;
                Ok(())
            }

            // ret
            0x8B | 0x9B | 0xAB => {
                let value = operand(&inst, 0)?;
                self.return_value(value)
            }

            // jump: unconditional signed 14-bit offset from the operand,
            // no branch descriptor involved
            0x8C | 0x9C | 0xAC => {
                let offset = zbytes::sign_extend_14(operand(&inst, 0)?);
                self.pc = (self.pc as i64 + inst.len as i64 + offset as i64 - 2) as u32;
                Ok(())
            }

            // print_paddr
            0x8D | 0x9D | 0xAD => {
                let addr = zbytes::packed_address(operand(&inst, 0)?);
                let (s, _) = self.decode_at(addr)?;
                self.print(&s);
                self.pc += inst.len;
                Ok(())
            }

            // load: read a variable and store it; variable 0 peeks
            0x8E | 0x9E | 0xAE => {
                let var = var_num(operand(&inst, 0)?)?;
                let value = if var == 0 {
                    self.frame()?.peek()
                } else {
                    self.get_var(var)?
                };
                self.store_result(inst.len, value)
            }

            // not
            0x8F | 0x9F | 0xAF => {
                let value = operand(&inst, 0)?;
                self.store_result(inst.len, !value)
            }

            // ---- 2OP ----

            // je: branch when the first operand equals any other
            0x01 | 0x21 | 0x41 | 0x61 | 0xC1 => {
                let first = operand(&inst, 0)?;
                let hit = inst.operands[1..].iter().any(|&v| v == first);
                self.branch(inst.len, hit)
            }

            // jl / jg: signed comparisons
            0x02 | 0x22 | 0x42 | 0x62 | 0xC2 => {
                let a = operand(&inst, 0)? as i16;
                let b = operand(&inst, 1)? as i16;
                self.branch(inst.len, a < b)
            }
            0x03 | 0x23 | 0x43 | 0x63 | 0xC3 => {
                let a = operand(&inst, 0)? as i16;
                let b = operand(&inst, 1)? as i16;
                self.branch(inst.len, a > b)
            }

            // dec_chk / inc_chk: adjust a variable in place, then compare
            0x04 | 0x24 | 0x44 | 0x64 | 0xC4 => {
                let var = var_num(operand(&inst, 0)?)?;
                let against = operand(&inst, 1)? as i16;
                let new = self.add_to_var(var, -1)?;
                self.branch(inst.len, new < against)
            }
            0x05 | 0x25 | 0x45 | 0x65 | 0xC5 => {
                let var = var_num(operand(&inst, 0)?)?;
                let against = operand(&inst, 1)? as i16;
                let new = self.add_to_var(var, 1)?;
                self.branch(inst.len, new > against)
            }

            // jin: is operand 1's parent operand 2
            0x06 | 0x26 | 0x46 | 0x66 | 0xC6 => {
                let child = self.object(obj_num(operand(&inst, 0)?)?)?;
                let cond = child.parent as u16 == operand(&inst, 1)?;
                self.branch(inst.len, cond)
            }

            // test: all flag bits set
            0x07 | 0x27 | 0x47 | 0x67 | 0xC7 => {
                let bitmap = operand(&inst, 0)?;
                let flags = operand(&inst, 1)?;
                self.branch(inst.len, bitmap & flags == flags)
            }

            // or / and
            0x08 | 0x28 | 0x48 | 0x68 | 0xC8 => {
                let value = operand(&inst, 0)? | operand(&inst, 1)?;
                self.store_result(inst.len, value)
            }
            0x09 | 0x29 | 0x49 | 0x69 | 0xC9 => {
                let value = operand(&inst, 0)? & operand(&inst, 1)?;
                self.store_result(inst.len, value)
            }

            // test_attr
            0x0A | 0x2A | 0x4A | 0x6A | 0xCA => {
                let cond = self
                    .object(obj_num(operand(&inst, 0)?)?)?
                    .has_attr(operand(&inst, 1)?);
                self.branch(inst.len, cond)
            }

            // set_attr / clear_attr
            0x0B | 0x2B | 0x4B | 0x6B | 0xCB => {
                let attr = operand(&inst, 1)?;
                self.object_mut(obj_num(operand(&inst, 0)?)?)?.set_attr(attr, true);
                self.pc += inst.len;
                Ok(())
            }
            0x0C | 0x2C | 0x4C | 0x6C | 0xCC => {
                let attr = operand(&inst, 1)?;
                self.object_mut(obj_num(operand(&inst, 0)?)?)?.set_attr(attr, false);
                self.pc += inst.len;
                Ok(())
            }

            // store: in place, so a variable 0 target replaces the top
            0x0D | 0x2D | 0x4D | 0x6D | 0xCD => {
                let var = var_num(operand(&inst, 0)?)?;
                let value = operand(&inst, 1)?;
                self.set_var_in_place(var, value)?;
                self.pc += inst.len;
                Ok(())
            }

            // insert_obj
            0x0E | 0x2E | 0x4E | 0x6E | 0xCE => {
                let num = obj_num(operand(&inst, 0)?)?;
                let dest = obj_num(operand(&inst, 1)?)?;
                zobject::insert_into(&mut self.objects, num, dest)?;
                self.pc += inst.len;
                Ok(())
            }

            // loadw / loadb
            0x0F | 0x2F | 0x4F | 0x6F | 0xCF => {
                let addr = operand(&inst, 0)? as u32 + 2 * operand(&inst, 1)? as u32;
                let value = self.read_word(addr)?;
                self.store_result(inst.len, value)
            }
            0x10 | 0x30 | 0x50 | 0x70 | 0xD0 => {
                let addr = operand(&inst, 0)? as u32 + operand(&inst, 1)? as u32;
                let value = self.read_byte(addr)? as u16;
                self.store_result(inst.len, value)
            }

            // get_prop
            0x11 | 0x31 | 0x51 | 0x71 | 0xD1 => {
                let obj = obj_num(operand(&inst, 0)?)?;
                let prop = operand(&inst, 1)? as u8;
                let value = self.object(obj)?.prop_value(prop, &self.prop_defaults);
                self.store_result(inst.len, value)
            }

            // get_prop_addr: data address, 0 when absent
            0x12 | 0x32 | 0x52 | 0x72 | 0xD2 => {
                let obj = obj_num(operand(&inst, 0)?)?;
                let prop = operand(&inst, 1)? as u8;
                let addr = self.object(obj)?.prop(prop).map(|p| p.addr).unwrap_or(0);
                self.store_result(inst.len, addr as u16)
            }

            // get_next_prop
            0x13 | 0x33 | 0x53 | 0x73 | 0xD3 => {
                let obj = obj_num(operand(&inst, 0)?)?;
                let prop = operand(&inst, 1)? as u8;
                let next = self.object(obj)?.next_prop(prop);
                self.store_result(inst.len, next as u16)
            }

            // add / sub / mul: 16-bit wraparound
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 => {
                let value = operand(&inst, 0)?.wrapping_add(operand(&inst, 1)?);
                self.store_result(inst.len, value)
            }
            0x15 | 0x35 | 0x55 | 0x75 | 0xD5 => {
                let value = operand(&inst, 0)?.wrapping_sub(operand(&inst, 1)?);
                self.store_result(inst.len, value)
            }
            0x16 | 0x36 | 0x56 | 0x76 | 0xD6 => {
                let value = operand(&inst, 0)?.wrapping_mul(operand(&inst, 1)?);
                self.store_result(inst.len, value)
            }

            // div / mod: signed, and dividing by zero is fatal
            0x17 | 0x37 | 0x57 | 0x77 | 0xD7 => {
                let a = operand(&inst, 0)? as i16;
                let b = operand(&inst, 1)? as i16;
                if b == 0 {
                    return Err("Division by zero".to_string());
                }
                self.store_result(inst.len, a.wrapping_div(b) as u16)
            }
            0x18 | 0x38 | 0x58 | 0x78 | 0xD8 => {
                let a = operand(&inst, 0)? as i16;
                let b = operand(&inst, 1)? as i16;
                if b == 0 {
                    return Err("Modulo by zero".to_string());
                }
                self.store_result(inst.len, a.wrapping_rem(b) as u16)
            }

            // ---- VAR ----

            // call
            0xE0 => {
                let packed = operand(&inst, 0)?;
                let args: Vec<u16> = inst.operands[1..].to_vec();
                self.call_routine(packed, &args, inst.len)
            }

            // storew / storeb
            0xE1 => {
                let addr = operand(&inst, 0)? as u32 + 2 * operand(&inst, 1)? as u32;
                self.write_word(addr, operand(&inst, 2)?)?;
                self.pc += inst.len;
                Ok(())
            }
            0xE2 => {
                let addr = operand(&inst, 0)? as u32 + operand(&inst, 1)? as u32;
                self.write_byte(addr, operand(&inst, 2)? as u8)?;
                self.pc += inst.len;
                Ok(())
            }

            // put_prop
            0xE3 => {
                let obj = obj_num(operand(&inst, 0)?)?;
                let prop = operand(&inst, 1)? as u8;
                let value = operand(&inst, 2)?;
                self.put_prop(obj, prop, value)?;
                self.pc += inst.len;
                Ok(())
            }

            // sread: the one blocking opcode
            0xE4 => {
                let text_addr = operand(&inst, 0)?;
                let parse_addr = operand(&inst, 1)?;
                self.do_sread(text_addr, parse_addr)?;
                self.pc += inst.len;
                Ok(())
            }

            // print_char
            0xE5 => {
                if let Some(c) = text::zscii_char(operand(&inst, 0)?) {
                    self.print(&c.to_string());
                }
                self.pc += inst.len;
                Ok(())
            }

            // print_num: signed decimal
            0xE6 => {
                let value = operand(&inst, 0)? as i16;
                self.print(&value.to_string());
                self.pc += inst.len;
                Ok(())
            }

            // random: positive draws, zero or negative reseeds
            0xE7 => {
                let range = operand(&inst, 0)? as i16;
                let value = if range > 0 {
                    self.rng.draw(range)
                } else {
                    if range == 0 {
                        self.rng.reseed_entropy();
                    } else {
                        self.rng.reseed(range as u64);
                    }
                    0
                };
                self.store_result(inst.len, value)
            }

            // push / pull
            0xE8 => {
                let value = operand(&inst, 0)?;
                self.frame_mut()?.push(value);
                self.pc += inst.len;
                Ok(())
            }
            0xE9 => {
                let var = var_num(operand(&inst, 0)?)?;
                let value = self.frame_mut()?.pop();
                self.set_var_in_place(var, value)?;
                self.pc += inst.len;
                Ok(())
            }

            // Screen and stream selection are recognized and ignored: the
            // host sees one flat text stream.
            0xEA | 0xEB | 0xF3 | 0xF4 => {
                debug!("{} ignored", opcode_name(inst.code));
                self.pc += inst.len;
                Ok(())
            }

            // sound_effect goes to the host
            0xF5 => {
                let id = operand(&inst, 0)?;
                let effect = inst.operands.get(1).copied().unwrap_or(0);
                let volume = inst.operands.get(2).copied().unwrap_or(0);
                self.host.play_sound(id, effect, volume);
                self.pc += inst.len;
                Ok(())
            }

            code => Err(format!(
                "Unimplemented instruction {:02x} ({})",
                code,
                opcode_name(code)
            )),
        }
    }

    /// Write a result through the store byte at `pc + inst_len` and step
    /// past it.
    fn store_result(&mut self, inst_len: u32, value: u16) -> Result<(), String> {
        let dest = self.read_byte(self.pc + inst_len)?;
        self.set_var(dest, value)?;
        self.pc += inst_len + 1;
        Ok(())
    }
}
