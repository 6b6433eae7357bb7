//! Field descriptor parsing (spec §3 Field Descriptor, §4.2 component support
//! for C5).
//!
//! Unlike the teacher's zero-copy `ColumnDefinition<'a>` (which borrows the
//! packet bytes and stitches a self-referential `Vec` together with an
//! `unsafe { transmute }`), [`FieldDescriptor`] owns its strings. A result set
//! has at most a few hundred columns, so the extra allocations are immaterial
//! next to the safety win.

use crate::constant::{ColumnFlags, ColumnType};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{Immutable, KnownLayout};

#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct ColumnDefinitionTail {
    charset: U16LE,
    column_length: U32LE,
    column_type: u8,
    flags: U16LE,
    decimals: u8,
    reserved: U16LE,
}

/// Column metadata (spec §3 Field Descriptor): catalog, database, table,
/// original table, name, original name, character-set id, display length,
/// type code, flags, decimal scale.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: ColumnFlags,
    pub decimals: u8,
}

impl FieldDescriptor {
    /// A column is nullable unless `NOT_NULL_FLAG` is set (spec §3).
    pub fn is_nullable(&self) -> bool {
        !self.flags.contains(ColumnFlags::NOT_NULL_FLAG)
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (catalog, data) = read_string_lenenc(payload)?;
        let (schema, data) = read_string_lenenc(data)?;
        let (table, data) = read_string_lenenc(data)?;
        let (org_table, data) = read_string_lenenc(data)?;
        let (name, data) = read_string_lenenc(data)?;
        let (org_name, data) = read_string_lenenc(data)?;

        // length of the fixed-length fields below, always 0x0c
        let (_fixed_len, data) = read_int_lenenc(data)?;
        let tail = ColumnDefinitionTail::ref_from_bytes(data)
            .map_err(|_| Error::internal("column definition: bad fixed fields"))?;

        let lossy = |bytes: Option<&[u8]>| {
            bytes
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default()
        };

        Ok(FieldDescriptor {
            catalog: lossy(catalog),
            schema: lossy(schema),
            table: lossy(table),
            org_table: lossy(org_table),
            name: lossy(name),
            org_name: lossy(org_name),
            charset: tail.charset.get(),
            column_length: tail.column_length.get(),
            column_type: ColumnType::from_u8(tail.column_type)
                .ok_or_else(|| Error::internal(format!("unknown column type 0x{:02x}", tail.column_type)))?,
            flags: ColumnFlags::from_bits_truncate(tail.flags.get()),
            decimals: tail.decimals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> Vec<u8> {
        let mut buf = Vec::new();
        write_string_lenenc(&mut buf, "def");
        write_string_lenenc(&mut buf, "mydb");
        write_string_lenenc(&mut buf, "t");
        write_string_lenenc(&mut buf, "t");
        write_string_lenenc(&mut buf, "id");
        write_string_lenenc(&mut buf, "id");
        write_int_lenenc(&mut buf, 0x0c);
        write_int_2(&mut buf, 63); // charset
        write_int_4(&mut buf, 11); // column_length
        write_int_1(&mut buf, ColumnType::MYSQL_TYPE_LONG as u8);
        write_int_2(&mut buf, ColumnFlags::NOT_NULL_FLAG.bits() | ColumnFlags::PRI_KEY_FLAG.bits());
        write_int_1(&mut buf, 0);
        write_int_2(&mut buf, 0);
        buf
    }

    #[test]
    fn parses_field_descriptor() {
        let field = FieldDescriptor::parse(&sample_payload()).unwrap();
        assert_eq!(field.name, "id");
        assert_eq!(field.schema, "mydb");
        assert_eq!(field.column_type, ColumnType::MYSQL_TYPE_LONG);
        assert!(!field.is_nullable());
    }
}
