//! End-to-end language scenarios exercised through a fresh interpreter,
//! the way an embedding drives it.

use demevo_script::{ErrorKind, FunctionRegistry, Interpreter, Value};

fn interp() -> Interpreter {
    Interpreter::new(FunctionRegistry::standard(), demevo_script::rng::shared(1))
}

fn eval(src: &str) -> Value {
    interp().evaluate_source(src).unwrap()
}

#[test]
fn test_arithmetic_scenarios() {
    assert_eq!(eval("sum(1:100);"), Value::int(5050));
    assert_eq!(eval("product(1:5);"), Value::int(120));
    assert_eq!(eval("(15:13)+(0:2);"), Value::int_vec(vec![15, 15, 15]));

    let err = interp().evaluate_source("(15:12)+(0:2);").unwrap_err();
    assert!(err.message.contains("operator requires that either"));
}

#[test]
fn test_vector_scenarios() {
    assert_eq!(eval("rep(c(3,7), 2);"), Value::int_vec(vec![3, 7, 3, 7]));
    assert_eq!(
        eval("repEach(c(3,7), c(2,3));"),
        Value::int_vec(vec![3, 3, 7, 7, 7])
    );
    assert_eq!(eval("seq(1, 10, 2);"), Value::int_vec(vec![1, 3, 5, 7, 9]));
}

#[test]
fn test_match_scenario() {
    assert_eq!(
        eval("match(c(1,2,2,9,5,1), c(5,1,9));"),
        Value::int_vec(vec![1, -1, -1, 2, 0, 1])
    );
}

#[test]
fn test_subscripted_assignment_scenario() {
    assert_eq!(
        eval("x = 1:5; x[x % 2 == 1] = 10; x;"),
        Value::int_vec(vec![10, 2, 10, 4, 10])
    );
}

#[test]
fn test_sampling_determinism_law() {
    // the law is the property: identical seed, identical draws
    let mut a = interp();
    let mut b = interp();
    let src = "setSeed(1); sample(1:5, 5, F);";
    assert_eq!(
        a.evaluate_source(src).unwrap(),
        b.evaluate_source(src).unwrap()
    );

    // and a reseed mid-script replays the stream
    let v = eval(
        "setSeed(42); first = runif(10); setSeed(42); second = runif(10); all(first == second);",
    );
    assert_eq!(v, Value::logical(true));
}

#[test]
fn test_fibonacci_program() {
    let src = "
        fib = integer(10);
        fib[0] = 1;
        fib[1] = 1;
        for (i in 2:9)
            fib[i] = fib[i - 1] + fib[i - 2];
        fib;
    ";
    assert_eq!(
        eval(src),
        Value::int_vec(vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55])
    );
}

#[test]
fn test_nested_loops_with_control_flow() {
    let src = "
        total = 0;
        for (i in 1:5) {
            j = 0;
            while (T) {
                j = j + 1;
                if (j == i) break;
            }
            if (i == 4) next;
            total = total + j;
        }
        total;
    ";
    assert_eq!(eval(src), Value::int(11));
}

#[test]
fn test_here_document_and_execute_lambda() {
    let src = "executeLambda(<<y = 6 * 7; y;>>);";
    assert_eq!(eval(src), Value::int(42));
}

#[test]
fn test_string_building() {
    let src = "
        parts = string(0);
        for (w in c('a', 'b', 'c'))
            parts = c(parts, w + '!');
        paste(parts, ' ');
    ";
    assert_eq!(eval(src), Value::string("a! b! c!"));
}

#[test]
fn test_error_positions_surface() {
    let err = interp().evaluate_source("x = 1;\nx + 'a' * 2;").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Type);
    assert!(err.position.is_some());
}

#[test]
fn test_output_collection_order() {
    let mut it = interp();
    it.evaluate_source("for (i in 1:3) cat(asString(i)); print('done');")
        .unwrap();
    assert_eq!(it.take_output(), "123done\n");
}

#[test]
fn test_apply_concatenation_rules() {
    assert_eq!(
        eval("apply(c(2, 4), 'rep(applyValue, 2);');"),
        Value::int_vec(vec![2, 2, 4, 4])
    );
}

#[test]
fn test_define_constant_program() {
    let src = "
        defineConstant('N', 100);
        counts = integer(0);
        for (i in 1:3)
            counts = c(counts, N * i);
        counts;
    ";
    assert_eq!(eval(src), Value::int_vec(vec![100, 200, 300]));
}

#[test]
fn test_invisible_flag_behavior() {
    let mut it = interp();
    // an assignment's result is invisible
    assert!(it.evaluate_source("x = 5;").unwrap().invisible());
    // copying the assigned value does not inherit invisibility
    assert!(!it.evaluate_source("y = x; y;").unwrap().invisible());
}
