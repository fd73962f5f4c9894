// ABOUTME: Evaluator walking heap-allocated forms with lexical environments

use crate::env::{extend, lookup, multi_extend};
use crate::error::Error;
use crate::heap::{GcRef, Heap};
use crate::value::{Cell, Closure};

/// Evaluate a form in the given environment.
///
/// A collection may run at any entry to this function, so every caller must
/// keep the values it holds across the call reachable from the root stack.
/// The root stack is truncated back to its entry depth on the way out, which
/// keeps the LIFO discipline intact even when an error unwinds through `?`.
pub fn eval(heap: &mut Heap, form: GcRef, env: GcRef) -> Result<GcRef, Error> {
    if heap.allocations_since_gc() > heap.gc_threshold() {
        heap.collect();
    }
    let depth = heap.root_depth();
    let result = eval_form(heap, form, env);
    heap.truncate_roots(depth);
    result
}

fn eval_form(heap: &mut Heap, form: GcRef, env: GcRef) -> Result<GcRef, Error> {
    match heap.cell(form) {
        Cell::Int(_) | Cell::Primitive(_) | Cell::Proc(_) | Cell::Macro(_) => Ok(form),
        Cell::Symbol(name) => {
            if form == heap.reserved.nil {
                return Ok(form);
            }
            match lookup(heap, form, env) {
                Some(entry) => Ok(heap.cdr(entry)),
                None => Err(Error::UnboundSymbol(name.clone())),
            }
        }
        Cell::Cons(..) => eval_combination(heap, form, env),
        Cell::Guard => unreachable!("the heap never hands out guard cells"),
    }
}

fn eval_combination(heap: &mut Heap, form: GcRef, env: GcRef) -> Result<GcRef, Error> {
    let reserved = heap.reserved;
    let head = heap.car(form);
    let rest = heap.cdr(form);

    if head == reserved.quote {
        return Ok(heap.car(rest));
    }

    if head == reserved.if_ {
        let condition_form = heap.car(rest);
        let condition = eval(heap, condition_form, env)?;
        let action_cell = heap.cdr(rest);
        if condition != reserved.nil {
            let action = heap.car(action_cell);
            return eval(heap, action, env);
        }
        let alternative_cell = heap.cdr(action_cell);
        if alternative_cell != reserved.nil {
            let alternative = heap.car(alternative_cell);
            return eval(heap, alternative, env);
        }
        return Ok(reserved.nil);
    }

    if head == reserved.progn {
        return eval_sequence(heap, rest, env);
    }

    if head == reserved.lambda {
        let params = heap.car(rest);
        let body = heap.cdr(rest);
        return Ok(heap.alloc_proc(Closure { params, body, env }));
    }

    if head == reserved.define {
        let sym = heap.car(rest);
        expect_symbol(heap, "define", sym)?;
        let value_cell = heap.cdr(rest);
        let value_form = heap.car(value_cell);
        let value = eval(heap, value_form, env)?;
        heap.push_root(value);
        extend(heap, env, sym, value);
        heap.pop_root();
        return Ok(value);
    }

    if head == reserved.setf {
        let sym = heap.car(rest);
        expect_symbol(heap, "setf", sym)?;
        let value_cell = heap.cdr(rest);
        let value_form = heap.car(value_cell);
        let entry = lookup(heap, sym, env)
            .ok_or_else(|| Error::UnboundSymbol(symbol_name(heap, sym)))?;
        // The right-hand side is stored as-is, without evaluation.
        heap.set_cdr(entry, value_form);
        return Ok(value_form);
    }

    if head == reserved.defmacro {
        let name = heap.car(rest);
        expect_symbol(heap, "defmacro", name)?;
        let tail = heap.cdr(rest);
        let params = heap.car(tail);
        let body = heap.cdr(tail);
        let toplevel = heap.toplevel();
        let mac = heap.alloc_macro(Closure {
            params,
            body,
            env: toplevel,
        });
        heap.push_root(mac);
        extend(heap, toplevel, name, mac);
        heap.pop_root();
        return Ok(mac);
    }

    let callee = eval(heap, head, env)?;
    heap.push_root(callee);
    let result = apply(heap, callee, rest, env);
    heap.pop_root();
    result
}

fn apply(heap: &mut Heap, callee: GcRef, arg_forms: GcRef, env: GcRef) -> Result<GcRef, Error> {
    let depth = heap.root_depth();
    let result = match heap.cell(callee) {
        Cell::Primitive(op) => {
            let op = *op;
            apply_primitive(heap, op, arg_forms, env)
        }
        Cell::Proc(closure) => {
            let closure = *closure;
            apply_proc(heap, closure, arg_forms, env)
        }
        Cell::Macro(closure) => {
            let closure = *closure;
            apply_macro(heap, closure, arg_forms, env)
        }
        other => Err(Error::NotCallable(other.type_name().to_string())),
    };
    heap.truncate_roots(depth);
    result
}

fn apply_primitive(
    heap: &mut Heap,
    op: crate::value::PrimitiveFn,
    arg_forms: GcRef,
    env: GcRef,
) -> Result<GcRef, Error> {
    let args = eval_list(heap, arg_forms, env)?;
    heap.push_root(args);
    let result = op(heap, args);
    heap.pop_root();
    result
}

fn apply_proc(
    heap: &mut Heap,
    closure: Closure,
    arg_forms: GcRef,
    env: GcRef,
) -> Result<GcRef, Error> {
    let args = eval_list(heap, arg_forms, env)?;
    heap.push_root(args);
    let frame = multi_extend(heap, closure.env, closure.params, args);
    heap.push_root(frame);
    let progn = heap.reserved.progn;
    let body = heap.cons(progn, closure.body);
    heap.push_root(body);
    let result = eval(heap, body, frame);
    heap.pop_root();
    heap.pop_root();
    heap.pop_root();
    result
}

fn apply_macro(
    heap: &mut Heap,
    closure: Closure,
    arg_forms: GcRef,
    env: GcRef,
) -> Result<GcRef, Error> {
    // The raw argument forms are bound unevaluated in a frame over the
    // caller's environment; the body produces an expansion which is then
    // evaluated where the macro was called.
    heap.push_root(arg_forms);
    let frame = multi_extend(heap, env, closure.params, arg_forms);
    heap.push_root(frame);
    let progn = heap.reserved.progn;
    let body = heap.cons(progn, closure.body);
    heap.push_root(body);
    let expansion = eval(heap, body, frame)?;
    heap.push_root(expansion);
    let result = eval(heap, expansion, env);
    heap.pop_root();
    heap.pop_root();
    heap.pop_root();
    heap.pop_root();
    result
}

/// Evaluate body forms in order and return the last result; an empty body
/// returns nil.
fn eval_sequence(heap: &mut Heap, body: GcRef, env: GcRef) -> Result<GcRef, Error> {
    if !heap.is_cons(body) {
        return Ok(heap.reserved.nil);
    }
    let mut current = body;
    loop {
        let form = heap.car(current);
        let result = eval(heap, form, env)?;
        let tail = heap.cdr(current);
        if !heap.is_cons(tail) {
            return Ok(result);
        }
        current = tail;
    }
}

/// Evaluate argument forms left to right into a fresh cons list. The head
/// value stays rooted while the tail is built behind it.
fn eval_list(heap: &mut Heap, forms: GcRef, env: GcRef) -> Result<GcRef, Error> {
    if !heap.is_cons(forms) {
        return Ok(heap.reserved.nil);
    }
    let head_form = heap.car(forms);
    let tail_forms = heap.cdr(forms);

    let head = eval(heap, head_form, env)?;
    heap.push_root(head);
    let tail = eval_list(heap, tail_forms, env)?;
    heap.push_root(tail);
    let list = heap.cons(head, tail);
    heap.pop_root();
    heap.pop_root();
    Ok(list)
}

fn expect_symbol(heap: &Heap, function: &str, value: GcRef) -> Result<(), Error> {
    if value == heap.reserved.nil {
        return Err(Error::type_error(function, "symbol", "nil", 1));
    }
    match heap.cell(value) {
        Cell::Symbol(_) => Ok(()),
        other => Err(Error::type_error(function, "symbol", other.type_name(), 1)),
    }
}

fn symbol_name(heap: &Heap, sym: GcRef) -> String {
    match heap.cell(sym) {
        Cell::Symbol(name) => name.clone(),
        other => unreachable!("expected a symbol cell, got {}", other.type_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::register_builtins;
    use crate::parser::{read, read_program};
    use crate::value::print;

    fn setup() -> Heap {
        let mut heap = Heap::new();
        register_builtins(&mut heap);
        heap
    }

    fn run(heap: &mut Heap, source: &str) -> Result<GcRef, Error> {
        let program = read_program(heap, source)?;
        heap.push_root(program);
        let toplevel = heap.toplevel();
        let result = eval(heap, program, toplevel);
        heap.pop_root();
        result
    }

    fn run_ok(heap: &mut Heap, source: &str) -> String {
        let result = run(heap, source).expect("program should evaluate");
        print(heap, result)
    }

    #[test]
    fn test_self_evaluating_int() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "42"), "42");
    }

    #[test]
    fn test_nil_evaluates_to_itself() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "nil"), "nil");
    }

    #[test]
    fn test_unbound_symbol_is_an_error() {
        let mut heap = setup();
        match run(&mut heap, "no-such-binding") {
            Err(Error::UnboundSymbol(name)) => assert_eq!(name, "no-such-binding"),
            other => panic!("expected unbound symbol error, got {:?}", other),
        }
    }

    #[test]
    fn test_quote_returns_argument_unevaluated() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(quote (1 2 3))"), "(1 2 3)");
        assert_eq!(run_ok(&mut heap, "'foo"), "foo");
    }

    #[test]
    fn test_quote_preserves_identity() {
        let mut heap = setup();
        let form = read(&mut heap, "x").expect("should parse");
        heap.push_root(form);
        let quote = heap.reserved.quote;
        let nil = heap.reserved.nil;
        let quoted_tail = heap.cons(form, nil);
        let quoted = heap.cons(quote, quoted_tail);
        heap.push_root(quoted);

        let toplevel = heap.toplevel();
        let result = eval(&mut heap, quoted, toplevel).expect("quote should evaluate");
        assert_eq!(result, form);
        heap.pop_root();
        heap.pop_root();
    }

    #[test]
    fn test_if_selects_branches() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(if (= 1 1) 10 20)"), "10");
        assert_eq!(run_ok(&mut heap, "(if (= 1 2) 10 20)"), "20");
        assert_eq!(run_ok(&mut heap, "(if nil 10)"), "nil");
        assert_eq!(run_ok(&mut heap, "(if 0 10 20)"), "10");
    }

    #[test]
    fn test_progn_returns_last_form() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(progn 1 2 3)"), "3");
        assert_eq!(run_ok(&mut heap, "(progn)"), "nil");
        assert_eq!(run_ok(&mut heap, "(progn 7)"), "7");
    }

    #[test]
    fn test_define_binds_and_returns_value() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(define x 5)"), "5");
        assert_eq!(run_ok(&mut heap, "x"), "5");
    }

    #[test]
    fn test_define_inside_lambda_is_local() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "((lambda () (define y 5) y))"), "5");
        assert!(matches!(
            run(&mut heap, "y"),
            Err(Error::UnboundSymbol(_))
        ));
    }

    #[test]
    fn test_define_target_must_be_symbol() {
        let mut heap = setup();
        assert!(matches!(
            run(&mut heap, "(define 3 4)"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_setf_stores_raw_form() {
        let mut heap = setup();
        run_ok(&mut heap, "(define x 1)");
        assert_eq!(run_ok(&mut heap, "(setf x 5) x"), "5");
        // The right-hand side is not evaluated; the stored value is the form
        // itself.
        assert_eq!(run_ok(&mut heap, "(setf x (+ 1 1)) x"), "(+ 1 1)");
    }

    #[test]
    fn test_setf_unbound_is_an_error() {
        let mut heap = setup();
        assert!(matches!(
            run(&mut heap, "(setf zz 1)"),
            Err(Error::UnboundSymbol(_))
        ));
    }

    #[test]
    fn test_setf_on_lambda_parameter() {
        let mut heap = setup();
        assert_eq!(
            run_ok(&mut heap, "((lambda (x) (setf x 3) (+ x 1)) 2)"),
            "4"
        );
    }

    #[test]
    fn test_lambda_application() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "((lambda (x) (+ x 1)) 41)"), "42");
        assert_eq!(run_ok(&mut heap, "((lambda (a b) (* a b)) 6 7)"), "42");
    }

    #[test]
    fn test_lambda_captures_lexical_environment() {
        let mut heap = setup();
        let source = "(define make-adder (lambda (n) (lambda (x) (+ x n))))
                      (define add3 (make-adder 3))
                      (add3 4)";
        assert_eq!(run_ok(&mut heap, source), "7");
    }

    #[test]
    fn test_extra_arguments_are_dropped() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "((lambda (x) x) 1 2 3)"), "1");
    }

    #[test]
    fn test_missing_argument_reference_is_unbound() {
        let mut heap = setup();
        assert!(matches!(
            run(&mut heap, "((lambda (x y) y) 1)"),
            Err(Error::UnboundSymbol(_))
        ));
    }

    #[test]
    fn test_recursive_factorial() {
        let mut heap = setup();
        let source = "(define f (lambda (n) (if (= n 0) 1 (* n (f (- n 1)))))) (f 5)";
        assert_eq!(run_ok(&mut heap, source), "120");
    }

    #[test]
    fn test_defmacro_installs_at_toplevel_and_expands() {
        let mut heap = setup();
        let source = "(defmacro unless (c b) (cons 'if (cons c (cons nil (cons b nil)))))
                      (unless nil 7)";
        assert_eq!(run_ok(&mut heap, source), "7");
        assert_eq!(run_ok(&mut heap, "(unless t 7)"), "nil");
    }

    #[test]
    fn test_defmacro_returns_the_macro() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(defmacro m (x) x)"), "#<MACRO>");
    }

    #[test]
    fn test_macro_receives_raw_forms() {
        let mut heap = setup();
        // The macro quotes its argument, so the caller gets the unevaluated
        // form back.
        let source = "(defmacro freeze (x) (cons 'quote (cons x nil)))
                      (freeze (+ 1 2))";
        assert_eq!(run_ok(&mut heap, source), "(+ 1 2)");
    }

    #[test]
    fn test_head_must_be_callable() {
        let mut heap = setup();
        match run(&mut heap, "(1 2 3)") {
            Err(Error::NotCallable(kind)) => assert_eq!(kind, "int"),
            other => panic!("expected not-callable error, got {:?}", other),
        }
    }

    #[test]
    fn test_progn_of_self_evaluating_equals_it() {
        let mut heap = setup();
        assert_eq!(run_ok(&mut heap, "(progn 42)"), run_ok(&mut heap, "42"));
    }

    #[test]
    fn test_root_stack_is_balanced_after_eval() {
        let mut heap = setup();
        let depth = heap.root_depth();
        run_ok(&mut heap, "(define g (lambda (n) (if (= n 0) 0 (g (- n 1))))) (g 50)");
        assert_eq!(heap.root_depth(), depth);

        let _ = run(&mut heap, "(+ 1 'x)");
        assert_eq!(heap.root_depth(), depth);
    }
}
