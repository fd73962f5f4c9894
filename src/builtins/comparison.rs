// ABOUTME: Comparison primitive: =

use super::int_arg;
use crate::error::{Error, ARITY_AT_LEAST_ONE};
use crate::heap::{GcRef, Heap};

/// Returns `t` iff all integer arguments are equal. A single argument
/// compares equal to itself. No arguments is an error.
///
/// ```lisp
/// (= 1 1 1) => t
/// (= 1 2) => nil
/// (= 5) => t
/// ```
pub fn primitive_eq(heap: &mut Heap, args: GcRef) -> Result<GcRef, Error> {
    if !heap.is_cons(args) {
        return Err(Error::arity_error("=", ARITY_AT_LEAST_ONE, 0));
    }

    let first_value = heap.car(args);
    let first = int_arg(heap, "=", first_value, 1)?;

    let mut current = heap.cdr(args);
    let mut position = 2;
    let mut all_equal = true;
    while heap.is_cons(current) {
        let value = heap.car(current);
        let n = int_arg(heap, "=", value, position)?;
        if n != first {
            all_equal = false;
        }
        current = heap.cdr(current);
        position += 1;
    }

    Ok(if all_equal {
        heap.reserved.t
    } else {
        heap.reserved.nil
    })
}

/// Register all comparison builtins in the top-level environment
pub fn register(heap: &mut Heap) {
    super::define_primitive(heap, "=", primitive_eq);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_args(heap: &mut Heap, values: &[i64]) -> GcRef {
        let mut list = heap.reserved.nil;
        for &value in values.iter().rev() {
            let cell = heap.alloc_int(value);
            list = heap.cons(cell, list);
        }
        list
    }

    #[test]
    fn test_eq_all_equal() {
        let mut heap = Heap::new();
        let args = int_args(&mut heap, &[3, 3, 3]);
        let result = primitive_eq(&mut heap, args).expect("should succeed");
        assert_eq!(result, heap.reserved.t);
    }

    #[test]
    fn test_eq_unequal() {
        let mut heap = Heap::new();
        let args = int_args(&mut heap, &[3, 4]);
        let result = primitive_eq(&mut heap, args).expect("should succeed");
        assert_eq!(result, heap.reserved.nil);
    }

    #[test]
    fn test_eq_single_argument_is_true() {
        let mut heap = Heap::new();
        let args = int_args(&mut heap, &[5]);
        let result = primitive_eq(&mut heap, args).expect("should succeed");
        assert_eq!(result, heap.reserved.t);
    }

    #[test]
    fn test_eq_no_arguments_is_an_arity_error() {
        let mut heap = Heap::new();
        let empty = heap.reserved.nil;
        assert!(matches!(
            primitive_eq(&mut heap, empty),
            Err(Error::Arity { .. })
        ));
    }

    #[test]
    fn test_eq_non_integer_is_a_type_error() {
        let mut heap = Heap::new();
        let sym = heap.intern("x");
        let nil = heap.reserved.nil;
        let args = heap.cons(sym, nil);
        assert!(matches!(
            primitive_eq(&mut heap, args),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
