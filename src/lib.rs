#![crate_name = "flathead"]

#[macro_use]
extern crate lazy_static;

pub mod dictionary;
pub mod frame;
pub mod header;
pub mod host;
pub mod instruction;
pub mod machine;
pub mod state;
pub mod step;
pub mod terminal;
pub mod test_util;
pub mod text;
pub mod zbytes;
pub mod zobject;
pub mod zrand;

/*
Memory map of a typical small version-3 story file:

Dynamic 00000  header
        00040  abbreviation strings
        00042  abbreviation table
        00102  property defaults
        00140  objects
        002f0  object descriptions and properties
        006e3  global variables
        008c3  arrays
Static  00b48  grammar table
        0124d  dictionary
High    01a0a  Z-code
        05d56  static strings
        06ae6  end of file
*/
