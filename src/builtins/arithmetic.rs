// ABOUTME: Arithmetic primitives: +, -, *, /

//! Integer arithmetic over variadic argument lists. Every argument must be
//! an integer cell. Results wrap on overflow (two's complement).

use super::int_arg;
use crate::error::{Error, ARITY_AT_LEAST_ONE};
use crate::heap::{GcRef, Heap};

/// Returns the sum of all arguments.
///
/// ```lisp
/// (+ 1 2 3) => 6
/// (+ 10) => 10
/// (+) => 0
/// ```
pub fn primitive_add(heap: &mut Heap, args: GcRef) -> Result<GcRef, Error> {
    let mut sum: i64 = 0;
    let mut current = args;
    let mut position = 1;
    while heap.is_cons(current) {
        let value = heap.car(current);
        sum = sum.wrapping_add(int_arg(heap, "+", value, position)?);
        current = heap.cdr(current);
        position += 1;
    }
    Ok(heap.alloc_int(sum))
}

/// Subtracts subsequent arguments from the first. With one argument,
/// returns its negation; with none, returns 0.
///
/// ```lisp
/// (- 10 3 2) => 5
/// (- 10) => -10
/// ```
pub fn primitive_sub(heap: &mut Heap, args: GcRef) -> Result<GcRef, Error> {
    let mut acc: i64 = 0;
    let mut count = 0usize;
    let mut current = args;
    while heap.is_cons(current) {
        let value = heap.car(current);
        let n = int_arg(heap, "-", value, count + 1)?;
        if count == 0 {
            acc = n;
        } else {
            acc = acc.wrapping_sub(n);
        }
        current = heap.cdr(current);
        count += 1;
    }
    if count == 1 {
        acc = acc.wrapping_neg();
    }
    Ok(heap.alloc_int(acc))
}

/// Returns the product of all arguments.
///
/// ```lisp
/// (* 2 3 4) => 24
/// (*) => 1
/// ```
pub fn primitive_mul(heap: &mut Heap, args: GcRef) -> Result<GcRef, Error> {
    let mut product: i64 = 1;
    let mut current = args;
    let mut position = 1;
    while heap.is_cons(current) {
        let value = heap.car(current);
        product = product.wrapping_mul(int_arg(heap, "*", value, position)?);
        current = heap.cdr(current);
        position += 1;
    }
    Ok(heap.alloc_int(product))
}

/// Divides the first argument by the subsequent ones, left to right. With
/// one argument, returns it unchanged. Division by zero is an error.
///
/// ```lisp
/// (/ 20 4) => 5
/// (/ 100 2 5) => 10
/// (/ 7) => 7
/// ```
pub fn primitive_div(heap: &mut Heap, args: GcRef) -> Result<GcRef, Error> {
    if !heap.is_cons(args) {
        return Err(Error::arity_error("/", ARITY_AT_LEAST_ONE, 0));
    }

    let first = heap.car(args);
    let mut acc = int_arg(heap, "/", first, 1)?;
    let mut current = heap.cdr(args);
    if !heap.is_cons(current) {
        return Ok(first);
    }

    let mut position = 2;
    while heap.is_cons(current) {
        let value = heap.car(current);
        let divisor = int_arg(heap, "/", value, position)?;
        if divisor == 0 {
            return Err(Error::runtime_error("/", "division by zero"));
        }
        acc = acc.wrapping_div(divisor);
        current = heap.cdr(current);
        position += 1;
    }
    Ok(heap.alloc_int(acc))
}

/// Register all arithmetic builtins in the top-level environment
pub fn register(heap: &mut Heap) {
    super::define_primitive(heap, "+", primitive_add);
    super::define_primitive(heap, "-", primitive_sub);
    super::define_primitive(heap, "*", primitive_mul);
    super::define_primitive(heap, "/", primitive_div);
}
