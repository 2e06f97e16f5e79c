//! Concolic ABI encoding for static argument types.
//!
//! Every argument becomes a named variable of its natural width in the
//! input's `VarContext`, so a solver model maps straight back to typed
//! arguments. A `bytesN` argument is split into one 8-bit variable per byte.

use alloy_primitives::{keccak256, U256};
use z3::Context;

use crate::error::{AbiError, Result};
use crate::symbolic::value::{ByteBuf, VarContext, Word};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    Uint(u32),
    Int(u32),
    Bool,
    Address,
    /// `bytesN`, 1 <= N <= 32, right-padded to a word.
    FixedBytes(u32),
}

impl AbiType {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let sized = |rest: &str| -> Result<u32> {
            if rest.is_empty() {
                return Ok(256);
            }
            let bits: u32 = rest
                .parse()
                .map_err(|_| AbiError::UnsupportedType(raw.to_string()))?;
            if bits == 0 || bits > 256 || bits % 8 != 0 {
                return Err(AbiError::UnsupportedType(raw.to_string()).into());
            }
            Ok(bits)
        };
        match raw {
            "bool" => Ok(AbiType::Bool),
            "address" => Ok(AbiType::Address),
            _ if raw.starts_with("bytes") => {
                let len: u32 = raw[5..]
                    .parse()
                    .map_err(|_| AbiError::UnsupportedType(raw.to_string()))?;
                if len == 0 || len > 32 {
                    return Err(AbiError::UnsupportedType(raw.to_string()).into());
                }
                Ok(AbiType::FixedBytes(len))
            }
            _ if raw.starts_with("uint") => Ok(AbiType::Uint(sized(&raw[4..])?)),
            _ if raw.starts_with("int") => Ok(AbiType::Int(sized(&raw[3..])?)),
            _ => Err(AbiError::UnsupportedType(raw.to_string()).into()),
        }
    }

    /// Width of the value an argument of this type carries. For `bytesN`
    /// that is the whole payload; each of its variables is 8 bits wide.
    pub fn bits(self) -> u32 {
        match self {
            AbiType::Uint(bits) | AbiType::Int(bits) => bits,
            AbiType::Bool => 1,
            AbiType::Address => 160,
            AbiType::FixedBytes(len) => len * 8,
        }
    }

    pub fn canonical(self) -> String {
        match self {
            AbiType::Uint(bits) => format!("uint{bits}"),
            AbiType::Int(bits) => format!("int{bits}"),
            AbiType::Bool => "bool".to_string(),
            AbiType::Address => "address".to_string(),
            AbiType::FixedBytes(len) => format!("bytes{len}"),
        }
    }
}

/// Parse `name(type,...)` into the name and argument types.
pub fn parse_signature(signature: &str) -> Result<(String, Vec<AbiType>)> {
    let malformed = || AbiError::MalformedSignature(signature.to_string());
    let open = signature.find('(').ok_or_else(malformed)?;
    let inner = signature[open + 1..].strip_suffix(')').ok_or_else(malformed)?;
    let name = signature[..open].trim();
    if name.is_empty() {
        return Err(malformed().into());
    }
    let types = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(AbiType::parse).collect::<Result<Vec<_>>>()?
    };
    Ok((name.to_string(), types))
}

pub fn function_signature(name: &str, types: &[AbiType]) -> String {
    let args: Vec<String> = types.iter().map(|t| t.canonical()).collect();
    format!("{name}({})", args.join(","))
}

pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Name of the variable bound to argument `idx` of transaction `tx`.
pub fn arg_var_name(tx: usize, idx: usize) -> String {
    format!("arg_{tx}_{idx}")
}

/// Name of the variable bound to byte `k` of `bytesN` argument `idx`.
pub fn byte_var_name(tx: usize, idx: usize, k: usize) -> String {
    format!("arg_{tx}_{idx}_{k}")
}

/// Encode a call to `name` with `args` (raw two's-complement bit patterns
/// for signed types, big-endian payloads for `bytesN`), declaring
/// `arg_{tx}_{i}` in `vars` for each argument, or `arg_{tx}_{i}_{k}` per
/// byte of a `bytesN`.
pub fn function_call<'ctx>(
    ctx: &'ctx Context,
    vars: &mut VarContext<'ctx>,
    tx: usize,
    name: &str,
    types: &[AbiType],
    args: &[U256],
) -> Result<ByteBuf<'ctx>> {
    if types.len() != args.len() {
        return Err(AbiError::ArgumentCount {
            expected: types.len(),
            got: args.len(),
        }
        .into());
    }
    let selector = function_selector(&function_signature(name, types));
    let mut data = ByteBuf::from_bytes(selector.to_vec());

    for (idx, (ty, value)) in types.iter().zip(args).enumerate() {
        let bits = ty.bits();
        if value.bit_len() > bits as usize {
            return Err(AbiError::ValueOutOfRange {
                ty: ty.canonical(),
                value: value.to_string(),
            }
            .into());
        }
        if let AbiType::FixedBytes(len) = ty {
            push_fixed_bytes(ctx, vars, &mut data, tx, idx, *len as usize, value);
            continue;
        }
        let word = vars.declare(ctx, &arg_var_name(tx, idx), bits, *value);
        let word = match ty {
            AbiType::Int(bits) if *bits < 256 => sign_extend(word, *bits),
            _ => word,
        };
        data.push_word(&word);
    }
    Ok(data)
}

fn push_fixed_bytes<'ctx>(
    ctx: &'ctx Context,
    vars: &mut VarContext<'ctx>,
    data: &mut ByteBuf<'ctx>,
    tx: usize,
    idx: usize,
    len: usize,
    value: &U256,
) {
    let start = data.len();
    data.ensure_len(start + 32);
    for k in 0..len {
        let byte = value.byte(len - 1 - k);
        let name = byte_var_name(tx, idx, k);
        vars.declare(ctx, &name, 8, U256::from(byte));
        let expr = vars.get(&name).map(|var| var.expr.clone());
        data.write_byte(start + k, byte, expr);
    }
}

/// Payload of a `bytesN` argument as the integer its bytes spell
/// big-endian. Inverse of the byte split done by [`function_call`].
pub fn fixed_bytes_value(bytes: &[u8]) -> U256 {
    U256::from_be_slice(bytes)
}

/// The `len` bytes of a `bytesN` payload.
pub fn fixed_bytes(value: U256, len: usize) -> Vec<u8> {
    (0..len).map(|k| value.byte(len - 1 - k)).collect()
}

/// Re-extend a zero-extended `bits`-wide variable with its sign bit.
fn sign_extend(word: Word<'_>, bits: u32) -> Word<'_> {
    let negative = word.concrete.bit(bits as usize - 1);
    let concrete = if negative {
        word.concrete | (U256::MAX << bits)
    } else {
        word.concrete
    };
    match word.symbolic {
        Some(expr) => Word::symbolic(concrete, expr.extract(bits - 1, 0).sign_ext(256 - bits)),
        None => Word::concrete(concrete),
    }
}

/// Two's-complement bit pattern of a signed decimal within `bits`.
pub fn encode_signed(raw: &str, bits: u32) -> Result<U256> {
    let out_of_range = || AbiError::ValueOutOfRange {
        ty: format!("int{bits}"),
        value: raw.to_string(),
    };
    let raw = raw.trim();
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let magnitude = U256::from_str_radix(digits, 10).map_err(|_| out_of_range())?;
    let limit = U256::from(1) << (bits - 1);
    let mask = if bits >= 256 {
        U256::MAX
    } else {
        (U256::from(1) << bits) - U256::from(1)
    };
    if negative {
        if magnitude > limit {
            return Err(out_of_range().into());
        }
        Ok(magnitude.wrapping_neg() & mask)
    } else {
        if magnitude >= limit {
            return Err(out_of_range().into());
        }
        Ok(magnitude)
    }
}

/// Inverse of [`encode_signed`].
pub fn decode_signed(value: U256, bits: u32) -> String {
    if bits == 0 || !value.bit(bits as usize - 1) {
        return value.to_string();
    }
    let modulus_minus = if bits >= 256 {
        value.wrapping_neg()
    } else {
        (U256::from(1) << bits) - value
    };
    format!("-{modulus_minus}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::Ast;
    use z3::Config;

    #[test]
    fn test_selector_of_known_signature() {
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_parse_signature() {
        let (name, types) = parse_signature("f(uint8,int,bool,address)").unwrap();
        assert_eq!(name, "f");
        assert_eq!(
            types,
            vec![AbiType::Uint(8), AbiType::Int(256), AbiType::Bool, AbiType::Address]
        );
        assert_eq!(function_signature(&name, &types), "f(uint8,int256,bool,address)");
        assert!(parse_signature("g()").unwrap().1.is_empty());
        assert!(parse_signature("h(bytes)").is_err());
        assert!(parse_signature("nope").is_err());
        assert!(AbiType::parse("uint7").is_err());
    }

    #[test]
    fn test_function_call_layout_and_vars() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut vars = VarContext::new();
        let data = function_call(
            &ctx,
            &mut vars,
            2,
            "f",
            &[AbiType::Uint(8), AbiType::Int(8)],
            &[U256::from(3), encode_signed("-1", 8).unwrap()],
        )
        .unwrap();

        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data.concrete_bytes()[..4], &function_selector("f(uint8,int8)"));
        assert_eq!(data.concrete_bytes()[35], 3);
        assert!(data.concrete_bytes()[36..68].iter().all(|b| *b == 0xff));
        assert!(data.is_symbolic_at(35));
        assert_eq!(vars.get("arg_2_1").unwrap().bits, 8);
        assert_eq!(vars.get("arg_2_1").unwrap().value, U256::from(0xff));

        // The top byte of the signed word tracks the variable's sign bit.
        let top = data.byte_bv(&ctx, 36);
        let var = vars.get("arg_2_1").unwrap().expr.clone();
        let forced = top.substitute(&[(&var, &z3::ast::BV::from_u64(&ctx, 0x01, 8))]);
        assert_eq!(forced.simplify().as_u64(), Some(0));
    }

    #[test]
    fn test_out_of_range_and_count() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let mut vars = VarContext::new();
        assert!(function_call(&ctx, &mut vars, 0, "f", &[AbiType::Uint(8)], &[U256::from(256)]).is_err());
        assert!(function_call(&ctx, &mut vars, 0, "f", &[AbiType::Bool], &[]).is_err());
        assert!(encode_signed("128", 8).is_err());
        assert!(encode_signed("-129", 8).is_err());
    }

    #[test]
    fn test_signed_round_trip_edges() {
        for raw in ["-128", "127", "0", "-1"] {
            assert_eq!(decode_signed(encode_signed(raw, 8).unwrap(), 8), raw);
        }
        assert_eq!(decode_signed(U256::MAX, 256), "-1");
    }

    #[test]
    fn test_fixed_bytes_are_right_padded_with_a_variable_per_byte() {
        let cfg = Config::new();
        let ctx = Context::new(&cfg);
        let ty = AbiType::parse("bytes3").unwrap();
        assert_eq!(ty, AbiType::FixedBytes(3));
        assert_eq!(ty.canonical(), "bytes3");
        assert!(AbiType::parse("bytes33").is_err());
        assert!(AbiType::parse("bytes0").is_err());

        let mut vars = VarContext::new();
        let payload = fixed_bytes_value(&[0xde, 0xad, 0x01]);
        let data = function_call(&ctx, &mut vars, 0, "g", &[ty, AbiType::Bool], &[payload, U256::from(1)]).unwrap();

        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data.concrete_bytes()[..4], &function_selector("g(bytes3,bool)"));
        assert_eq!(&data.concrete_bytes()[4..7], &[0xde, 0xad, 0x01]);
        assert!(data.concrete_bytes()[7..36].iter().all(|b| *b == 0));
        assert!((4..7).all(|i| data.is_symbolic_at(i)));
        assert!(!data.is_symbolic_at(7));
        assert_eq!(data.concrete_bytes()[67], 1);

        let first = vars.get(&byte_var_name(0, 0, 0)).unwrap();
        assert_eq!(first.bits, 8);
        assert_eq!(first.value, U256::from(0xde));
        assert_eq!(vars.get(&byte_var_name(0, 0, 2)).unwrap().value, U256::from(0x01));
        assert!(!vars.contains(&arg_var_name(0, 0)));
        assert!(vars.contains(&arg_var_name(0, 1)));

        assert_eq!(fixed_bytes(payload, 3), vec![0xde, 0xad, 0x01]);
        assert!(function_call(&ctx, &mut vars, 1, "g", &[ty], &[U256::from(1) << 24]).is_err());
    }
}
