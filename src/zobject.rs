use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::header::Header;
use crate::text;
use crate::zbytes;

/// Object number 0 is the null object; it is never materialized and any
/// decoded reference to it is a program error.
pub const NULL_OBJECT: u8 = 0;

/// Version 3 object numbers are bytes, so a table can hold at most this
/// many entries. The parser also uses it as a runaway guard.
pub const MAX_OBJECTS: usize = 255;

const ENTRY_SIZE: u32 = 9;
const NUM_DEFAULTS: u32 = 31;

/// One property of an object: 1 or 2 data bytes in version 3 (the format
/// allows up to 8, which `get_prop` and `put_prop` refuse).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub num: u8,
    pub size: u8,
    pub data: Vec<u8>,
    /// Address of the data bytes in the image, not of the size byte.
    pub addr: u32,
}

/// A parsed object: 32 attribute bits, tree links and an ordered property
/// list. The whole table is parsed once at load; all later mutation
/// happens on these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZObject {
    pub num: u8,
    pub name: String,
    pub attrs: [bool; 32],
    pub parent: u8,
    pub sibling: u8,
    pub child: u8,
    pub props: Vec<Property>,
}

impl ZObject {
    /// Attribute index 0 is the most significant bit of the first
    /// attribute byte. Indexes past 31 read as clear.
    pub fn has_attr(&self, attr: u16) -> bool {
        if attr > 31 {
            return false;
        }
        self.attrs[attr as usize]
    }

    /// Set or clear an attribute. Out-of-range indexes are ignored.
    pub fn set_attr(&mut self, attr: u16, value: bool) {
        if attr > 31 {
            debug!(
                "Attribute index {} out of range on object {}, ignored",
                attr, self.num
            );
            return;
        }
        self.attrs[attr as usize] = value;
    }

    pub fn prop(&self, num: u8) -> Option<&Property> {
        self.props.iter().find(|p| p.num == num)
    }

    /// Property value as a word: one-byte properties zero-extend, absent
    /// properties fall back to the defaults table.
    pub fn prop_value(&self, num: u8, defaults: &[u16]) -> u16 {
        if num == 0 {
            return 0;
        }
        match self.prop(num) {
            Some(p) if p.size == 1 => p.data[0] as u16,
            Some(p) if p.size == 2 => ((p.data[0] as u16) << 8) | p.data[1] as u16,
            Some(p) => {
                debug!(
                    "get_prop on object {} property {} with size {}",
                    self.num, num, p.size
                );
                0
            }
            None => defaults.get(num as usize - 1).copied().unwrap_or(0),
        }
    }

    /// Walk the property list in stored order: 0 yields the first property
    /// number, otherwise the number following `num`, or 0 at the end.
    pub fn next_prop(&self, num: u8) -> u8 {
        if num == 0 {
            return self.props.first().map(|p| p.num).unwrap_or(0);
        }
        let mut iter = self.props.iter();
        while let Some(p) = iter.next() {
            if p.num == num {
                return iter.next().map(|p| p.num).unwrap_or(0);
            }
        }
        0
    }

    /// Write a property value into the parsed record. Returns the data
    /// address and size so the caller can mirror the bytes into the image,
    /// or None when the property is absent or too long to set.
    pub fn put_prop(&mut self, num: u8, value: u16) -> Option<(u32, u8)> {
        let prop = self.props.iter_mut().find(|p| p.num == num)?;
        match prop.size {
            1 => prop.data[0] = (value & 0xFF) as u8,
            2 => {
                prop.data[0] = (value >> 8) as u8;
                prop.data[1] = (value & 0xFF) as u8;
            }
            _ => return None,
        }
        Some((prop.addr, prop.size))
    }
}

/// Split a version-3 property size byte into (number, size in bytes).
pub fn prop_size_number(size_byte: u8) -> (u8, u8) {
    (size_byte & 0x1F, (size_byte >> 5) + 1)
}

/// Parse the object table: 31 property-default words followed by 9-byte
/// object entries. The entry count is not stored anywhere; entries run
/// until the cursor reaches the property-list region, which the property
/// pointer of object 1 marks.
pub fn parse_object_table(
    mem: &[u8],
    header: &Header,
    abbrevs: &[String],
) -> Result<(Vec<u16>, Vec<ZObject>), String> {
    let base = header.object_table as u32;

    let mut defaults = Vec::with_capacity(NUM_DEFAULTS as usize);
    for i in 0..NUM_DEFAULTS {
        defaults.push(zbytes::read_word(mem, base + i * 2)?);
    }

    let entries_base = base + NUM_DEFAULTS * 2;
    let mut objects: Vec<ZObject> = Vec::new();
    let mut prop_region = u32::MAX;

    loop {
        let entry = entries_base + objects.len() as u32 * ENTRY_SIZE;
        if entry >= prop_region || objects.len() >= MAX_OBJECTS {
            break;
        }
        if entry as usize + ENTRY_SIZE as usize > mem.len() {
            return Err(format!(
                "Object table truncated: entry {} at {:05x} runs past the image",
                objects.len() + 1,
                entry
            ));
        }

        let mut attrs = [false; 32];
        for byte in 0..4usize {
            let bits = mem[entry as usize + byte];
            for bit in 0..8usize {
                attrs[byte * 8 + bit] = bits & (0x80 >> bit) != 0;
            }
        }
        let parent = mem[entry as usize + 4];
        let sibling = mem[entry as usize + 5];
        let child = mem[entry as usize + 6];

        let prop_addr = zbytes::read_word(mem, entry + 7)? as u32;
        if prop_addr == 0 || prop_addr as usize >= mem.len() {
            return Err(format!(
                "Object {} has property pointer {:05x} out of range",
                objects.len() + 1,
                prop_addr
            ));
        }
        if objects.is_empty() {
            prop_region = prop_addr;
        }

        // Property list header: a word count, then the short name.
        let name_words = mem[prop_addr as usize] as u32;
        let name = if name_words > 0 {
            text::decode_string(mem, prop_addr + 1, abbrevs)?.0
        } else {
            String::new()
        };

        let mut props = Vec::new();
        let mut cursor = prop_addr + 1 + name_words * 2;
        loop {
            let size_byte = *mem.get(cursor as usize).ok_or_else(|| {
                format!("Property list of object {} truncated", objects.len() + 1)
            })?;
            if size_byte == 0 {
                break;
            }
            let (num, size) = prop_size_number(size_byte);
            let start = cursor + 1;
            let end = start + size as u32;
            if end as usize > mem.len() {
                return Err(format!(
                    "Property {} of object {} truncated",
                    num,
                    objects.len() + 1
                ));
            }
            props.push(Property {
                num,
                size,
                data: mem[start as usize..end as usize].to_vec(),
                addr: start,
            });
            cursor = end;
        }

        let obj = ZObject {
            num: (objects.len() + 1) as u8,
            name,
            attrs,
            parent,
            sibling,
            child,
            props,
        };
        trace!(
            "Parsed object {} '{}': parent={} sibling={} child={} props={}",
            obj.num,
            obj.name,
            obj.parent,
            obj.sibling,
            obj.child,
            obj.props.len()
        );
        objects.push(obj);
    }

    Ok((defaults, objects))
}

fn index(objects: &[ZObject], num: u8) -> Result<usize, String> {
    if num == NULL_OBJECT || num as usize > objects.len() {
        return Err(format!(
            "Attempt to access invalid object {} (table has {})",
            num,
            objects.len()
        ));
    }
    Ok(num as usize - 1)
}

/// Unlink `num` from its parent's child chain, preserving the order of its
/// siblings. An object with no parent is left alone.
pub fn remove_from_parent(objects: &mut [ZObject], num: u8) -> Result<(), String> {
    let i = index(objects, num)?;
    let parent = objects[i].parent;
    let sibling = objects[i].sibling;
    if parent == NULL_OBJECT {
        return Ok(());
    }

    let p = index(objects, parent)?;
    if objects[p].child == num {
        objects[p].child = sibling;
    } else {
        let mut cursor = objects[p].child;
        while cursor != NULL_OBJECT {
            let c = index(objects, cursor)?;
            if objects[c].sibling == num {
                objects[c].sibling = sibling;
                break;
            }
            cursor = objects[c].sibling;
        }
    }

    objects[i].parent = NULL_OBJECT;
    objects[i].sibling = NULL_OBJECT;
    Ok(())
}

/// Move `num` to be the first child of `dest`, detaching it from wherever
/// it was first.
pub fn insert_into(objects: &mut [ZObject], num: u8, dest: u8) -> Result<(), String> {
    remove_from_parent(objects, num)?;
    let d = index(objects, dest)?;
    let old_child = objects[d].child;
    objects[d].child = num;
    let i = index(objects, num)?;
    objects[i].parent = dest;
    objects[i].sibling = old_child;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_object(num: u8, parent: u8, sibling: u8, child: u8) -> ZObject {
        ZObject {
            num,
            name: String::new(),
            attrs: [false; 32],
            parent,
            sibling,
            child,
            props: Vec::new(),
        }
    }

    /// The tree from most test stories: 1 contains 2 then 3.
    fn small_tree() -> Vec<ZObject> {
        vec![
            bare_object(1, 0, 0, 2),
            bare_object(2, 1, 3, 0),
            bare_object(3, 1, 0, 0),
        ]
    }

    #[test]
    fn remove_first_child_relinks_parent() {
        let mut objs = small_tree();
        remove_from_parent(&mut objs, 2).unwrap();
        assert_eq!(objs[0].child, 3);
        assert_eq!(objs[1].parent, 0);
        assert_eq!(objs[1].sibling, 0);
        assert_eq!(objs[2].sibling, 0);
    }

    #[test]
    fn remove_middle_child_preserves_order() {
        let mut objs = vec![
            bare_object(1, 0, 0, 2),
            bare_object(2, 1, 3, 0),
            bare_object(3, 1, 4, 0),
            bare_object(4, 1, 0, 0),
        ];
        remove_from_parent(&mut objs, 3).unwrap();
        assert_eq!(objs[0].child, 2);
        assert_eq!(objs[1].sibling, 4);
        assert_eq!(objs[2].parent, 0);
    }

    #[test]
    fn remove_orphan_is_a_no_op() {
        let mut objs = small_tree();
        let before = objs.clone();
        remove_from_parent(&mut objs, 1).unwrap();
        assert_eq!(objs[0].child, before[0].child);
        assert_eq!(objs[1].parent, before[1].parent);
    }

    #[test]
    fn insert_then_remove_restores_structure() {
        let mut objs = small_tree();
        insert_into(&mut objs, 3, 2).unwrap();
        assert_eq!(objs[1].child, 3);
        assert_eq!(objs[2].parent, 2);

        remove_from_parent(&mut objs, 3).unwrap();
        insert_into(&mut objs, 3, 1).unwrap();
        // 3 is now the first child of 1 with 2 as its sibling.
        assert_eq!(objs[0].child, 3);
        assert_eq!(objs[2].sibling, 2);
        assert_eq!(objs[2].parent, 1);
        assert_eq!(objs[1].child, 0);
    }

    #[test]
    fn null_object_access_traps() {
        let mut objs = small_tree();
        assert!(remove_from_parent(&mut objs, 0).is_err());
        assert!(insert_into(&mut objs, 2, 9).is_err());
    }

    #[test]
    fn attribute_zero_is_high_bit() {
        let mut o = bare_object(1, 0, 0, 0);
        o.attrs[0] = true;
        assert!(o.has_attr(0));
        assert!(!o.has_attr(1));
        assert!(!o.has_attr(77));
        o.set_attr(31, true);
        assert!(o.has_attr(31));
        o.set_attr(40, true); // ignored, not a panic
    }

    #[test]
    fn property_walk_in_stored_order() {
        let mut o = bare_object(1, 0, 0, 0);
        o.props = vec![
            Property { num: 18, size: 2, data: vec![0, 1], addr: 0x100 },
            Property { num: 11, size: 1, data: vec![9], addr: 0x104 },
            Property { num: 4, size: 2, data: vec![2, 3], addr: 0x106 },
        ];
        assert_eq!(o.next_prop(0), 18);
        assert_eq!(o.next_prop(18), 11);
        assert_eq!(o.next_prop(11), 4);
        assert_eq!(o.next_prop(4), 0);
        assert_eq!(o.next_prop(7), 0);
    }

    #[test]
    fn prop_value_sizes_and_defaults() {
        let mut o = bare_object(1, 0, 0, 0);
        o.props = vec![
            Property { num: 5, size: 1, data: vec![0xAB], addr: 0x100 },
            Property { num: 6, size: 2, data: vec![0x12, 0x34], addr: 0x102 },
        ];
        let defaults: Vec<u16> = (1..=31).collect();
        assert_eq!(o.prop_value(5, &defaults), 0x00AB);
        assert_eq!(o.prop_value(6, &defaults), 0x1234);
        assert_eq!(o.prop_value(9, &defaults), 9);
        assert_eq!(o.prop_value(0, &defaults), 0);
    }

    #[test]
    fn put_prop_sizes() {
        let mut o = bare_object(1, 0, 0, 0);
        o.props = vec![
            Property { num: 5, size: 1, data: vec![0], addr: 0x100 },
            Property { num: 6, size: 2, data: vec![0, 0], addr: 0x102 },
        ];
        assert_eq!(o.put_prop(5, 0xBEEF), Some((0x100, 1)));
        assert_eq!(o.props[0].data, vec![0xEF]);
        assert_eq!(o.put_prop(6, 0xBEEF), Some((0x102, 2)));
        assert_eq!(o.props[1].data, vec![0xBE, 0xEF]);
        assert_eq!(o.put_prop(7, 1), None);
    }

    #[test]
    fn size_byte_decodes() {
        assert_eq!(prop_size_number(0x11), (0x11, 1));
        assert_eq!(prop_size_number(0x31), (0x11, 2));
        assert_eq!(prop_size_number(0x1F), (0x1F, 1));
        assert_eq!(prop_size_number(0xE1), (0x01, 8));
    }
}
