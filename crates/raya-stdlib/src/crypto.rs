//! Crypto module (`native:crypto`)
//!
//! Hashing, secure random generation, hex encoding and constant-time
//! comparison.
//!
//! | Function | Signature |
//! |---|---|
//! | `hash` | `(algorithm: string, data: string) -> string` (hex digest) |
//! | `randomBytes` | `(length: i32) -> i32[]` (values 0..=255) |
//! | `randomInt` | `(min: i32, max: i32) -> i32` in `[min, max)` |
//! | `toHex` | `(data: string) -> string` |
//! | `fromHex` | `(hex: string) -> string` |
//! | `constantTimeEqual` | `(a: string, b: string) -> bool` |

use crate::args::{finish, string_value, Args, Thrown};
use crate::build_module;
use raya_ffi::{
    raya_array_set, raya_value_array, raya_value_bool, raya_value_free, raya_value_i32,
    RayaContext, RayaModule, RayaNativeFn, RayaValue,
};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use subtle::{Choice, ConstantTimeEq};

/// Largest length accepted by `randomBytes`
pub const MAX_RANDOM_BYTES: i32 = 1_048_576;

const FUNCTIONS: &[(&str, RayaNativeFn, usize)] = &[
    ("hash", hash, 2),
    ("randomBytes", random_bytes, 1),
    ("randomInt", random_int, 2),
    ("toHex", to_hex, 1),
    ("fromHex", from_hex, 1),
    ("constantTimeEqual", constant_time_equal, 2),
];

/// Build the `crypto` module
pub fn module() -> *mut RayaModule {
    build_module("crypto", FUNCTIONS)
}

/// Entry point used when the module is loaded from a shared library
#[no_mangle]
pub extern "C" fn raya_module_init_crypto() -> *mut RayaModule {
    module()
}

// ============================================================================
// Method Implementations
// ============================================================================

/// crypto.hash(algorithm, data): string (hex digest)
unsafe extern "C" fn hash(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.hash", argv, argc);
    finish((|| {
        args.expect_count(2)?;
        let algorithm = args.string(0)?;
        let data = args.string(1)?;
        let digest = digest(&algorithm, data.as_bytes())
            .ok_or_else(|| args.argument_error(format!("unsupported algorithm '{}'", algorithm)))?;
        Ok(string_value(ctx, &hex::encode(digest)))
    })())
}

/// crypto.randomBytes(length): i32[]
unsafe extern "C" fn random_bytes(
    ctx: *mut RayaContext,
    argv: *const *mut RayaValue,
    argc: usize,
) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.randomBytes", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let length = checked_length(&args, args.i32(0)?)?;

        let mut bytes = vec![0u8; length];
        rand::thread_rng().fill_bytes(&mut bytes);
        byte_array(&args, &bytes)
    })())
}

/// crypto.randomInt(min, max): i32 in [min, max)
unsafe extern "C" fn random_int(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.randomInt", argv, argc);
    finish((|| {
        args.expect_count(2)?;
        let min = args.i32(0)?;
        let max = args.i32(1)?;
        if min >= max {
            return Err(args.argument_error("min must be less than max"));
        }
        Ok(raya_value_i32(rand::thread_rng().gen_range(min..max)))
    })())
}

/// crypto.toHex(data): string
unsafe extern "C" fn to_hex(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.toHex", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        Ok(string_value(ctx, &hex::encode(args.string(0)?)))
    })())
}

/// crypto.fromHex(hex): string
unsafe extern "C" fn from_hex(ctx: *mut RayaContext, argv: *const *mut RayaValue, argc: usize) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.fromHex", argv, argc);
    finish((|| {
        args.expect_count(1)?;
        let bytes = hex::decode(args.string(0)?)
            .map_err(|e| args.argument_error(format!("invalid hex: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| args.argument_error("decoded bytes are not valid UTF-8"))?;
        Ok(string_value(ctx, &text))
    })())
}

/// crypto.constantTimeEqual(a, b): bool
unsafe extern "C" fn constant_time_equal(
    ctx: *mut RayaContext,
    argv: *const *mut RayaValue,
    argc: usize,
) -> *mut RayaValue {
    let args = Args::new(ctx, "crypto.constantTimeEqual", argv, argc);
    finish((|| {
        args.expect_count(2)?;
        let a = args.string(0)?;
        let b = args.string(1)?;
        Ok(raya_value_bool(constant_time_eq(a.as_bytes(), b.as_bytes()) as i32))
    })())
}

// ============================================================================
// Helpers
// ============================================================================

fn checked_length(args: &Args<'_>, length: i32) -> Result<usize, Thrown> {
    if length <= 0 || length > MAX_RANDOM_BYTES {
        return Err(args.argument_error(format!(
            "length must be between 1 and {}, got {}",
            MAX_RANDOM_BYTES, length
        )));
    }
    Ok(length as usize)
}

unsafe fn byte_array(args: &Args<'_>, bytes: &[u8]) -> Result<*mut RayaValue, Thrown> {
    let array = raya_value_array(args.ctx(), bytes.len());
    if array.is_null() {
        return Err(args.error("could not allocate result array"));
    }
    for (index, &byte) in bytes.iter().enumerate() {
        let element = raya_value_i32(i32::from(byte));
        if raya_array_set(array, index, element) != 0 {
            raya_value_free(element);
            raya_value_free(array);
            return Err(args.error("could not fill result array"));
        }
    }
    Ok(array)
}

fn digest(algorithm: &str, data: &[u8]) -> Option<Vec<u8>> {
    let digest = match algorithm.to_ascii_lowercase().as_str() {
        "sha224" => Sha224::digest(data).to_vec(),
        "sha256" => Sha256::digest(data).to_vec(),
        "sha384" => Sha384::digest(data).to_vec(),
        "sha512" => Sha512::digest(data).to_vec(),
        _ => return None,
    };
    Some(digest)
}

/// Compare every position up to the longer length; returns the verdict and
/// the number of positions visited
fn compare_all(a: &[u8], b: &[u8]) -> (Choice, usize) {
    let len = a.len().max(b.len());
    let mut equal = (a.len() as u64).ct_eq(&(b.len() as u64));
    let mut visited = 0;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        equal &= x.ct_eq(&y);
        visited += 1;
    }
    (equal, visited)
}

/// Equality whose running time depends only on the lengths of the inputs
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    compare_all(a, b).0.into()
}
