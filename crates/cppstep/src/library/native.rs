//! Native registry for opaque library bodies
//!
//! Each `@marker` body in a bundled header maps to one host function here.
//! Native routines run as a single visible step: they see the callee's
//! parameter cells and receiver, touch memory only through the context (so
//! writes still surface as events), and either return a result or report
//! that they are blocked on input.

use crate::runtime::events::{EventQueue, SimEvent};
use crate::runtime::memory::Memory;
use crate::runtime::simulation::{Eval, InputBuffer};
use crate::runtime::value::{Address, Value};

/// Everything a native routine may touch
pub struct NativeCtx<'a> {
    pub memory: &'a mut Memory,
    pub events: &'a mut EventQueue,
    pub input: &'a mut InputBuffer,
    pub stdout: &'a mut String,
    pub rng_state: &'a mut u64,
    /// Receiver object for member functions
    pub receiver: Option<Address>,
    /// Addresses of the callee's parameter cells, in declaration order
    pub params: Vec<Address>,
}

pub enum NativeOutcome {
    Return(Eval),
    /// Blocked on `cin`; the call retries after input arrives
    NeedInput,
}

pub type NativeOp = fn(&mut NativeCtx<'_>) -> NativeOutcome;

pub fn lookup(marker: &str) -> Option<NativeOp> {
    let op: NativeOp = match marker {
        "ostream_insert_int" | "ostream_insert_double" | "ostream_insert_char"
        | "ostream_insert_bool" => insert_scalar,
        "ostream_insert_cstring" => insert_cstring,
        "istream_extract_int" => extract_int,
        "istream_extract_double" => extract_double,
        "istream_extract_char" => extract_char,
        "rand" => rand,
        "srand" => srand,
        "abs" => abs,
        _ => return None,
    };
    Some(op)
}

pub fn is_registered(marker: &str) -> bool {
    lookup(marker).is_some()
}

impl NativeCtx<'_> {
    /// Lenient read: native routines run right after parameter copies, so a
    /// bad cell here means an engine bug, not user error. Junk is returned
    /// rather than panicking.
    fn read(&self, address: Address) -> Value {
        use crate::runtime::memory::InvalidRead;
        match self.memory.read(address) {
            Ok(v) => v,
            Err(InvalidRead::Dead(junk)) => junk,
            Err(_) => Value::Uninit,
        }
    }

    fn write(&mut self, address: Address, value: Value) {
        if self.memory.write(address, value) {
            self.events.push(SimEvent::MemoryWrite { address, value });
        }
    }

    fn emit(&mut self, text: String) {
        self.stdout.push_str(&text);
        self.events.push(SimEvent::Output(text));
    }

    fn param(&self, i: usize) -> Value {
        self.params.get(i).map(|&a| self.read(a)).unwrap_or(Value::Uninit)
    }

    /// NUL-terminated character sequence starting at `address`; stops at the
    /// first invalid cell so a wild pointer prints what it can.
    fn cstring_at(&self, address: Address) -> String {
        let mut out = String::new();
        let mut cursor = address;
        loop {
            match self.memory.read(cursor) {
                Ok(Value::Char('\0')) => break,
                Ok(Value::Char(c)) => out.push(c),
                _ => break,
            }
            cursor += 1;
        }
        out
    }

    fn stream_result(&self) -> NativeOutcome {
        NativeOutcome::Return(Eval::Object(self.receiver.unwrap_or(0)))
    }
}

// ==================== ostream ====================

fn insert_scalar(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let value = ctx.param(0);
    ctx.emit(value.to_string());
    ctx.stream_result()
}

fn insert_cstring(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let address = ctx.param(0).as_address();
    let text = ctx.cstring_at(address);
    ctx.emit(text);
    ctx.stream_result()
}

// ==================== istream ====================
//
// Extraction parameters are references, so the parameter cell holds the
// address of the object being read into.

fn extract_int(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let Some(token) = ctx.input.next_token() else {
        return NativeOutcome::NeedInput;
    };
    let target = ctx.param(0).as_address();
    let parsed = token.parse::<i64>().unwrap_or(0);
    ctx.write(target, Value::Int(parsed));
    ctx.stream_result()
}

fn extract_double(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let Some(token) = ctx.input.next_token() else {
        return NativeOutcome::NeedInput;
    };
    let target = ctx.param(0).as_address();
    let parsed = token.parse::<f64>().unwrap_or(0.0);
    ctx.write(target, Value::Double(parsed));
    ctx.stream_result()
}

fn extract_char(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let Some(c) = ctx.input.next_char() else {
        return NativeOutcome::NeedInput;
    };
    let target = ctx.param(0).as_address();
    ctx.write(target, Value::Char(c));
    ctx.stream_result()
}

// ==================== cstdlib ====================

fn rand(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    // The linear congruential generator many C libraries ship.
    *ctx.rng_state = ctx.rng_state.wrapping_mul(1103515245).wrapping_add(12345);
    let value = ((*ctx.rng_state >> 16) & 0x7fff) as i64;
    NativeOutcome::Return(Eval::Value(Value::Int(value)))
}

fn srand(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    *ctx.rng_state = ctx.param(0).as_int() as u64;
    NativeOutcome::Return(Eval::None)
}

fn abs(ctx: &mut NativeCtx<'_>) -> NativeOutcome {
    let value = ctx.param(0).as_int();
    NativeOutcome::Return(Eval::Value(Value::Int(value.wrapping_abs())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::memory::ObjectKind;
    use crate::sema::EntityRegistry;
    use crate::types::Type;

    struct Rig {
        memory: Memory,
        events: EventQueue,
        input: InputBuffer,
        stdout: String,
        rng_state: u64,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                memory: Memory::new(),
                events: EventQueue::new(),
                input: InputBuffer::default(),
                stdout: String::new(),
                rng_state: 1,
            }
        }

        fn ctx(&mut self, params: Vec<Address>) -> NativeCtx<'_> {
            NativeCtx {
                memory: &mut self.memory,
                events: &mut self.events,
                input: &mut self.input,
                stdout: &mut self.stdout,
                rng_state: &mut self.rng_state,
                receiver: Some(0x10),
                params,
            }
        }
    }

    #[test]
    fn test_every_marker_is_registered() {
        for marker in [
            "ostream_insert_int",
            "ostream_insert_double",
            "ostream_insert_char",
            "ostream_insert_bool",
            "ostream_insert_cstring",
            "istream_extract_int",
            "istream_extract_double",
            "istream_extract_char",
            "rand",
            "srand",
            "abs",
        ] {
            assert!(is_registered(marker), "{marker} missing");
        }
        assert!(!is_registered("no_such_marker"));
    }

    #[test]
    fn test_insert_int_emits_output() {
        let reg = EntityRegistry::new();
        let mut rig = Rig::new();
        let (p, _) = rig
            .memory
            .allocate(&Type::int(), ObjectKind::Parameter, None, &reg);
        rig.memory.write(p, Value::Int(42));
        let mut ctx = rig.ctx(vec![p]);
        match insert_scalar(&mut ctx) {
            NativeOutcome::Return(Eval::Object(recv)) => assert_eq!(recv, 0x10),
            _ => panic!("expected a stream result"),
        }
        assert_eq!(rig.stdout, "42");
    }

    #[test]
    fn test_extract_int_blocks_then_writes() {
        let reg = EntityRegistry::new();
        let mut rig = Rig::new();
        let (target, _) = rig
            .memory
            .allocate(&Type::int(), ObjectKind::Local, Some("x".into()), &reg);
        let (p, _) = rig.memory.allocate(
            &Type::int().reference_to(),
            ObjectKind::Parameter,
            None,
            &reg,
        );
        rig.memory.write(p, Value::Pointer(target));

        let mut ctx = rig.ctx(vec![p]);
        assert!(matches!(extract_int(&mut ctx), NativeOutcome::NeedInput));

        rig.input.push_line("17 4");
        let mut ctx = rig.ctx(vec![p]);
        assert!(matches!(extract_int(&mut ctx), NativeOutcome::Return(_)));
        assert_eq!(rig.memory.read(target), Ok(Value::Int(17)));
        // The second token stays buffered for the next extraction.
        assert!(!rig.input.is_empty());
    }

    #[test]
    fn test_rand_is_deterministic() {
        let mut rig = Rig::new();
        let first = match rand(&mut rig.ctx(vec![])) {
            NativeOutcome::Return(Eval::Value(Value::Int(v))) => v,
            _ => panic!("rand must return an int"),
        };
        let mut other = Rig::new();
        let again = match rand(&mut other.ctx(vec![])) {
            NativeOutcome::Return(Eval::Value(Value::Int(v))) => v,
            _ => panic!("rand must return an int"),
        };
        assert_eq!(first, again);
        assert!((0..=0x7fff).contains(&first));
    }
}
