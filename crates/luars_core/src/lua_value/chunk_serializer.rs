// Precompiled chunk loader and writer (Lua 5.3 binary format)
//
// Loading is two-phase: the whole stream is parsed into a detached
// `ProtoDraft` tree first, and objects are only allocated once it parsed
// cleanly, so a rejected chunk leaves nothing behind.

use smol_str::SmolStr;
use std::io::{Cursor, Read};
use tracing::debug;

use super::{
    LUA_TBOOLEAN, LUA_TLNGSTR, LUA_TNIL, LUA_TNUMFLT, LUA_TNUMINT, LUA_TSHRSTR, LocVar, LuaValue,
    Proto, UpvalueDesc,
};
use crate::gc::{LClosureId, ObjectPool, ProtoId, StringId};
use crate::lua_vm::lua_limits::LUAI_MAXCCALLS;
use crate::lua_vm::{LuaError, LuaResult, LuaVM};

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x53;
pub const LUAC_FORMAT: u8 = 0;
/// Bytes catching common text-mode corruptions
pub const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
pub const LUAC_INT: i64 = 0x5678;
pub const LUAC_NUM: f64 = 370.5;

const SIZE_INT: u8 = 4;
const SIZE_SIZE_T: u8 = 8;
const SIZE_INSTRUCTION: u8 = 4;
const SIZE_INTEGER: u8 = 8;
const SIZE_NUMBER: u8 = 8;

/// Name used in load errors: `@file` and `=name` lose their prefix, a
/// name that is itself binary becomes "binary string"
pub fn chunk_name(name: &str) -> SmolStr {
    if let Some(rest) = name.strip_prefix('@').or_else(|| name.strip_prefix('=')) {
        SmolStr::new(rest)
    } else if name.as_bytes().first() == Some(&LUA_SIGNATURE[0]) {
        SmolStr::new_static("binary string")
    } else {
        SmolStr::new(name)
    }
}

enum ConstDraft {
    Nil,
    Boolean(bool),
    Float(f64),
    Integer(i64),
    Str(Vec<u8>),
}

#[derive(Default)]
struct ProtoDraft {
    source: Option<Vec<u8>>,
    linedefined: i32,
    lastlinedefined: i32,
    numparams: u8,
    is_vararg: bool,
    maxstacksize: u8,
    code: Vec<u32>,
    constants: Vec<ConstDraft>,
    upvalues: Vec<(bool, u8)>,
    protos: Vec<ProtoDraft>,
    lineinfo: Vec<i32>,
    locvars: Vec<(Option<Vec<u8>>, u32, u32)>,
    upvalue_names: Vec<Option<Vec<u8>>>,
}

impl ProtoDraft {
    fn count(&self) -> usize {
        1 + self.protos.iter().map(ProtoDraft::count).sum::<usize>()
    }
}

// ============ Reading ============

fn read_block(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>, String> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err("truncated".into());
    }
    let mut buf = vec![0u8; len];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| "truncated".to_string())?;
    Ok(buf)
}

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> Result<[u8; N], String> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| "truncated".to_string())?;
    Ok(buf)
}

fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8, String> {
    Ok(read_array::<1>(cursor)?[0])
}

fn read_int(cursor: &mut Cursor<&[u8]>) -> Result<i32, String> {
    Ok(i32::from_ne_bytes(read_array(cursor)?))
}

/// Element count of a vector; negative counts are corrupt
fn read_count(cursor: &mut Cursor<&[u8]>) -> Result<usize, String> {
    let n = read_int(cursor)?;
    usize::try_from(n).map_err(|_| "corrupted".to_string())
}

fn read_size_t(cursor: &mut Cursor<&[u8]>) -> Result<u64, String> {
    Ok(u64::from_ne_bytes(read_array(cursor)?))
}

fn read_integer(cursor: &mut Cursor<&[u8]>) -> Result<i64, String> {
    Ok(i64::from_ne_bytes(read_array(cursor)?))
}

fn read_number(cursor: &mut Cursor<&[u8]>) -> Result<f64, String> {
    Ok(f64::from_ne_bytes(read_array(cursor)?))
}

/// Size byte (0xFF: a size_t follows), 0 for a missing string, else
/// length + 1
fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<Option<Vec<u8>>, String> {
    let mut size = read_u8(cursor)? as u64;
    if size == 0xFF {
        size = read_size_t(cursor)?;
    }
    if size == 0 {
        return Ok(None);
    }
    let len = usize::try_from(size - 1).map_err(|_| "truncated".to_string())?;
    read_block(cursor, len).map(Some)
}

fn check_literal(cursor: &mut Cursor<&[u8]>, expected: &[u8], why: &str) -> Result<(), String> {
    let got = read_block(cursor, expected.len()).map_err(|_| why.to_string())?;
    if got != expected {
        return Err(why.to_string());
    }
    Ok(())
}

fn check_size(cursor: &mut Cursor<&[u8]>, size: u8, tname: &str) -> Result<(), String> {
    if read_u8(cursor)? != size {
        return Err(format!("{} size mismatch in", tname));
    }
    Ok(())
}

fn check_header(cursor: &mut Cursor<&[u8]>) -> Result<(), String> {
    check_literal(cursor, LUA_SIGNATURE, "not a")?;
    if read_u8(cursor)? != LUAC_VERSION {
        return Err("version mismatch in".into());
    }
    if read_u8(cursor)? != LUAC_FORMAT {
        return Err("format mismatch in".into());
    }
    check_literal(cursor, LUAC_DATA, "corrupted")?;
    check_size(cursor, SIZE_INT, "int")?;
    check_size(cursor, SIZE_SIZE_T, "size_t")?;
    check_size(cursor, SIZE_INSTRUCTION, "Instruction")?;
    check_size(cursor, SIZE_INTEGER, "lua_Integer")?;
    check_size(cursor, SIZE_NUMBER, "lua_Number")?;
    if read_integer(cursor)? != LUAC_INT {
        return Err("endianness mismatch in".into());
    }
    if read_number(cursor)? != LUAC_NUM {
        return Err("float format mismatch in".into());
    }
    Ok(())
}

fn read_constant(cursor: &mut Cursor<&[u8]>) -> Result<ConstDraft, String> {
    let tag = read_u8(cursor)?;
    Ok(match tag {
        LUA_TNIL => ConstDraft::Nil,
        LUA_TBOOLEAN => ConstDraft::Boolean(read_u8(cursor)? != 0),
        LUA_TNUMFLT => ConstDraft::Float(read_number(cursor)?),
        LUA_TNUMINT => ConstDraft::Integer(read_integer(cursor)?),
        LUA_TSHRSTR | LUA_TLNGSTR => match read_string(cursor)? {
            Some(s) => ConstDraft::Str(s),
            None => return Err("corrupted".into()),
        },
        _ => return Err("corrupted".into()),
    })
}

/// Nested functions deeper than this cannot come from the compiler
const MAX_NESTING: usize = LUAI_MAXCCALLS;

fn read_function(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<ProtoDraft, String> {
    if depth > MAX_NESTING {
        return Err("corrupted".into());
    }
    let mut f = ProtoDraft {
        source: read_string(cursor)?,
        linedefined: read_int(cursor)?,
        lastlinedefined: read_int(cursor)?,
        numparams: read_u8(cursor)?,
        is_vararg: read_u8(cursor)? != 0,
        maxstacksize: read_u8(cursor)?,
        ..Default::default()
    };

    let n = read_count(cursor)?;
    let raw = read_block(cursor, n.checked_mul(4).ok_or("truncated")?)?;
    f.code = raw
        .chunks_exact(4)
        .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();

    let n = read_count(cursor)?;
    for _ in 0..n {
        f.constants.push(read_constant(cursor)?);
    }

    let n = read_count(cursor)?;
    for _ in 0..n {
        let in_stack = read_u8(cursor)? != 0;
        let idx = read_u8(cursor)?;
        f.upvalues.push((in_stack, idx));
    }

    let n = read_count(cursor)?;
    for _ in 0..n {
        f.protos.push(read_function(cursor, depth + 1)?);
    }

    // debug information
    let n = read_count(cursor)?;
    for _ in 0..n {
        f.lineinfo.push(read_int(cursor)?);
    }
    let n = read_count(cursor)?;
    for _ in 0..n {
        let name = read_string(cursor)?;
        let start_pc = read_int(cursor)? as u32;
        let end_pc = read_int(cursor)? as u32;
        f.locvars.push((name, start_pc, end_pc));
    }
    let n = read_count(cursor)?;
    if n > f.upvalues.len() {
        return Err("corrupted".into());
    }
    for _ in 0..n {
        f.upvalue_names.push(read_string(cursor)?);
    }
    Ok(f)
}

/// Parse a whole chunk: header, upvalue count, main function
fn read_chunk(data: &[u8]) -> Result<(u8, ProtoDraft), String> {
    let mut cursor = Cursor::new(data);
    check_header(&mut cursor)?;
    let nupvalues = read_u8(&mut cursor)?;
    let main = read_function(&mut cursor, 0)?;
    if nupvalues as usize != main.upvalues.len() {
        return Err("corrupted".into());
    }
    Ok((nupvalues, main))
}

// ============ Writing ============

struct DumpState<'a> {
    pool: &'a ObjectPool,
    buf: Vec<u8>,
    strip: bool,
}

impl DumpState<'_> {
    fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn write_int(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn write_count(&mut self, n: usize) {
        self.write_int(n as i32);
    }

    fn write_integer(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn write_number(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn write_bytes(&mut self, s: Option<&[u8]>) {
        match s {
            None => self.write_u8(0),
            Some(bytes) => {
                let size = bytes.len() + 1;
                if size < 0xFF {
                    self.write_u8(size as u8);
                } else {
                    self.write_u8(0xFF);
                    self.buf.extend_from_slice(&(size as u64).to_ne_bytes());
                }
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    fn write_string(&mut self, s: Option<StringId>) {
        let pool = self.pool;
        self.write_bytes(s.map(|id| pool.string(id).as_bytes()));
    }

    fn write_header(&mut self) {
        self.buf.extend_from_slice(LUA_SIGNATURE);
        self.write_u8(LUAC_VERSION);
        self.write_u8(LUAC_FORMAT);
        self.buf.extend_from_slice(LUAC_DATA);
        for size in [SIZE_INT, SIZE_SIZE_T, SIZE_INSTRUCTION, SIZE_INTEGER, SIZE_NUMBER] {
            self.write_u8(size);
        }
        self.write_integer(LUAC_INT);
        self.write_number(LUAC_NUM);
    }

    fn write_function(&mut self, id: ProtoId, parent_source: Option<StringId>) {
        let pool = self.pool;
        let f = pool.proto(id);
        if self.strip || f.source == parent_source {
            self.write_string(None);
        } else {
            self.write_string(f.source);
        }
        self.write_int(f.linedefined);
        self.write_int(f.lastlinedefined);
        self.write_u8(f.numparams);
        self.write_u8(f.is_vararg as u8);
        self.write_u8(f.maxstacksize);

        self.write_count(f.code.len());
        for &i in &f.code {
            self.buf.extend_from_slice(&i.to_ne_bytes());
        }

        self.write_count(f.constants.len());
        for k in &f.constants {
            match *k {
                LuaValue::Nil => self.write_u8(LUA_TNIL),
                LuaValue::Boolean(b) => {
                    self.write_u8(LUA_TBOOLEAN);
                    self.write_u8(b as u8);
                }
                LuaValue::Float(n) => {
                    self.write_u8(LUA_TNUMFLT);
                    self.write_number(n);
                }
                LuaValue::Integer(i) => {
                    self.write_u8(LUA_TNUMINT);
                    self.write_integer(i);
                }
                LuaValue::ShortString(s) => {
                    self.write_u8(LUA_TSHRSTR);
                    self.write_string(Some(s));
                }
                LuaValue::LongString(s) => {
                    self.write_u8(LUA_TLNGSTR);
                    self.write_string(Some(s));
                }
                _ => panic!("constant of type {} cannot be dumped", k.type_name()),
            }
        }

        self.write_count(f.upvalues.len());
        for uv in &f.upvalues {
            self.write_u8(uv.in_stack as u8);
            self.write_u8(uv.idx);
        }

        self.write_count(f.protos.len());
        for &p in &f.protos {
            self.write_function(p, f.source);
        }

        let strip = self.strip;
        self.write_count(if strip { 0 } else { f.lineinfo.len() });
        if !strip {
            for &line in &f.lineinfo {
                self.write_int(line);
            }
        }
        self.write_count(if strip { 0 } else { f.locvars.len() });
        if !strip {
            for var in &f.locvars {
                self.write_string(var.varname);
                self.write_int(var.start_pc as i32);
                self.write_int(var.end_pc as i32);
            }
        }
        self.write_count(if strip { 0 } else { f.upvalues.len() });
        if !strip {
            for uv in &f.upvalues {
                self.write_string(uv.name);
            }
        }
    }
}

// ============ VM entry points ============

impl LuaVM {
    /// Load a precompiled chunk (luaU_undump). Returns the main closure
    /// with its upvalues initialized. On failure nothing is allocated and
    /// the message is `"<name>: <why> precompiled chunk"`.
    pub fn undump(&mut self, data: &[u8], name: &str) -> LuaResult<LClosureId> {
        let (nupvalues, main) = match read_chunk(data) {
            Ok(parsed) => parsed,
            Err(why) => {
                self.error_message = format!("{}: {} precompiled chunk", chunk_name(name), why);
                return Err(LuaError::MalformedChunk);
            }
        };
        let functions = main.count();
        let proto = self.build_proto(main, None)?;
        let cl = self.new_lua_closure(proto, nupvalues as usize)?;
        self.init_upvals(cl)?;
        debug!(source = %chunk_name(name), functions, "binary chunk loaded");
        Ok(cl)
    }

    fn build_string(&mut self, bytes: Option<Vec<u8>>) -> LuaResult<Option<StringId>> {
        match bytes {
            Some(b) => Ok(self.create_string(&b)?.as_string_id()),
            None => Ok(None),
        }
    }

    /// Allocate a parsed function and its children, innermost first
    fn build_proto(&mut self, draft: ProtoDraft, parent_source: Option<StringId>) -> LuaResult<ProtoId> {
        let source = match draft.source {
            Some(s) => self.build_string(Some(s))?,
            None => parent_source,
        };

        let mut constants = Vec::with_capacity(draft.constants.len());
        for k in draft.constants {
            constants.push(match k {
                ConstDraft::Nil => LuaValue::Nil,
                ConstDraft::Boolean(b) => LuaValue::Boolean(b),
                ConstDraft::Float(n) => LuaValue::Float(n),
                ConstDraft::Integer(i) => LuaValue::Integer(i),
                ConstDraft::Str(s) => self.create_string(&s)?,
            });
        }

        let mut protos = Vec::with_capacity(draft.protos.len());
        for child in draft.protos {
            protos.push(self.build_proto(child, source)?);
        }

        let mut names = draft.upvalue_names.into_iter();
        let mut upvalues = Vec::with_capacity(draft.upvalues.len());
        for (in_stack, idx) in draft.upvalues {
            let name = self.build_string(names.next().flatten())?;
            upvalues.push(UpvalueDesc { name, in_stack, idx });
        }

        let mut locvars = Vec::with_capacity(draft.locvars.len());
        for (name, start_pc, end_pc) in draft.locvars {
            locvars.push(LocVar {
                varname: self.build_string(name)?,
                start_pc,
                end_pc,
            });
        }

        self.create_proto(Proto {
            code: draft.code,
            constants,
            protos,
            upvalues,
            lineinfo: draft.lineinfo,
            locvars,
            source,
            linedefined: draft.linedefined,
            lastlinedefined: draft.lastlinedefined,
            numparams: draft.numparams,
            is_vararg: draft.is_vararg,
            maxstacksize: draft.maxstacksize,
        })
    }

    /// Serialize a prototype tree (luaU_dump). A stripped dump carries no
    /// debug information.
    pub fn dump(&self, proto: ProtoId, strip: bool) -> Vec<u8> {
        let mut d = DumpState {
            pool: &self.gc.pool,
            buf: Vec::new(),
            strip,
        };
        d.write_header();
        d.write_u8(self.proto(proto).upvalues.len() as u8);
        d.write_function(proto, None);
        d.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_name() {
        assert_eq!(chunk_name("@main.lua"), "main.lua");
        assert_eq!(chunk_name("=stdin"), "stdin");
        assert_eq!(chunk_name("\x1bLua"), "binary string");
        assert_eq!(chunk_name("chunk"), "chunk");
    }

    #[test]
    fn test_string_encoding() {
        let data = [4u8, b'a', b'b', b'c'];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_string(&mut cursor).unwrap(), Some(b"abc".to_vec()));

        let data = [0u8];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_string(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_long_string_size_prefix() {
        let mut data = vec![0xFFu8];
        data.extend_from_slice(&301u64.to_ne_bytes());
        data.extend(std::iter::repeat_n(b'z', 300));
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_string(&mut cursor).unwrap().map(|s| s.len()), Some(300));
    }

    #[test]
    fn test_truncated_string() {
        let data = [10u8, b'a'];
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(read_string(&mut cursor).unwrap_err(), "truncated");
    }
}
