use super::{compile, CompileError, CompileOptions, SemanticError, SubroutineKind};
use crate::{
    lexer::LexerError,
    symbols::{Scope, SymbolError},
    vm::Instruction,
};
use assert2::{assert, check, let_assert};

fn vm_lines(source: &str) -> Vec<String> {
    let compiled = compile(source, &CompileOptions::default()).unwrap();
    compiled.instructions.iter().map(ToString::to_string).collect()
}

fn main_with(body: &str) -> String {
    format!("class Main {{ function void main() {{ {body} }} }}")
}

fn error_of(source: &str) -> CompileError {
    compile(source, &CompileOptions::default()).unwrap_err()
}

fn semantic_error_of(source: &str) -> SemanticError {
    let_assert!(CompileError::Semantic { error, .. } = error_of(source));
    error
}

#[test]
fn call_with_sum_argument() {
    let lines = vm_lines(&main_with("do Output.printInt(1 + 2); return;"));
    check!(
        lines
            == [
                "function Main.main 0",
                "push constant 1",
                "push constant 2",
                "add",
                "call Output.printInt 1",
                "pop temp 0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn array_store() {
    let lines = vm_lines(&main_with("var Array a; let a[2] = 5; return;"));
    check!(
        lines
            == [
                "function Main.main 1",
                "push local 0",
                "push constant 2",
                "add",
                "pop pointer 1",
                "push constant 5",
                "pop that 0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn array_copy_keeps_target_address() {
    let lines = vm_lines(&main_with("var Array a, b; let a[1] = b[2]; return;"));
    check!(
        lines
            == [
                "function Main.main 2",
                "push local 0",
                "push constant 1",
                "add",
                "push local 1",
                "push constant 2",
                "add",
                "pop pointer 1",
                "push that 0",
                "pop temp 0",
                "pop pointer 1",
                "push temp 0",
                "pop that 0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn if_else_uses_two_labels() {
    let lines = vm_lines(&main_with(
        "var int x; if (x) { let x = 1; } else { let x = 2; } return;",
    ));
    check!(
        lines
            == [
                "function Main.main 1",
                "push local 0",
                "not",
                "if-goto IF_FALSE0",
                "push constant 1",
                "pop local 0",
                "goto IF_END0",
                "label IF_FALSE0",
                "push constant 2",
                "pop local 0",
                "label IF_END0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn while_loop() {
    let lines = vm_lines(&main_with(
        "var int i; while (i < 3) { let i = i + 1; } return;",
    ));
    check!(
        lines
            == [
                "function Main.main 1",
                "label WHILE_EXP0",
                "push local 0",
                "push constant 3",
                "lt",
                "not",
                "if-goto WHILE_END0",
                "push local 0",
                "push constant 1",
                "add",
                "pop local 0",
                "goto WHILE_EXP0",
                "label WHILE_END0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn labels_are_unique_within_a_subroutine() {
    let lines = vm_lines(&main_with(
        "var int x; \
         if (x) { if (x) { let x = 0; } } \
         while (x) { while (x) { let x = 0; } } \
         return;",
    ));
    let labels: Vec<_> = lines.iter().filter(|l| l.starts_with("label ")).collect();
    check!(
        labels
            == [
                "label IF_FALSE1",
                "label IF_END1",
                "label IF_FALSE0",
                "label IF_END0",
                "label WHILE_EXP2",
                "label WHILE_EXP3",
                "label WHILE_END3",
                "label WHILE_END2",
            ]
    );
}

#[test]
fn operators_apply_left_to_right() {
    let lines = vm_lines(&main_with("do Output.printInt(1 + 2 * 3 / (4 - 5)); return;"));
    check!(
        lines[1..11]
            == [
                "push constant 1",
                "push constant 2",
                "add",
                "push constant 3",
                "call Math.multiply 2",
                "push constant 4",
                "push constant 5",
                "sub",
                "call Math.divide 2",
                "call Output.printInt 1",
            ]
    );
}

#[test]
fn keyword_constants_and_unary_operators() {
    let lines = vm_lines(&main_with(
        "var boolean b; let b = true; let b = ~false; let b = null; let b = -b; return;",
    ));
    check!(
        lines[1..]
            == [
                "push constant 0",
                "not",
                "pop local 0",
                "push constant 0",
                "not",
                "pop local 0",
                "push constant 0",
                "pop local 0",
                "push local 0",
                "neg",
                "pop local 0",
                "push constant 0",
                "return",
            ]
    );
}

#[test]
fn string_constants_are_built_by_char() {
    let lines = vm_lines(&main_with(r#"do Output.printString("Hi!"); return;"#));
    check!(
        lines[1..10]
            == [
                "push constant 3",
                "call String.new 1",
                "push constant 72",
                "call String.appendChar 2",
                "push constant 105",
                "call String.appendChar 2",
                "push constant 33",
                "call String.appendChar 2",
                "call Output.printString 1",
            ]
    );
}

const POINT: &str = "
class Point {
    field int x, y;
    static int count;

    constructor Point new(int ax, int ay) {
        let x = ax;
        let y = ay;
        let count = count + 1;
        return this;
    }

    method int getX() { return x; }

    method Point plus(Point other) {
        return Point.new(x + other.getX(), y);
    }

    function int total() { return count; }
}
";

#[test]
fn constructors_methods_and_functions() {
    check!(
        vm_lines(POINT)
            == [
                "function Point.new 0",
                "push constant 2",
                "call Memory.alloc 1",
                "pop pointer 0",
                "push argument 0",
                "pop this 0",
                "push argument 1",
                "pop this 1",
                "push static 0",
                "push constant 1",
                "add",
                "pop static 0",
                "push pointer 0",
                "return",
                "function Point.getX 0",
                "push argument 0",
                "pop pointer 0",
                "push this 0",
                "return",
                "function Point.plus 0",
                "push argument 0",
                "pop pointer 0",
                "push this 0",
                "push argument 1",
                "call Point.getX 1",
                "add",
                "push this 1",
                "call Point.new 2",
                "return",
                "function Point.total 0",
                "push static 0",
                "return",
            ]
    );
}

#[test]
fn class_summary() {
    let compiled = compile(POINT, &CompileOptions::default()).unwrap();
    check!(compiled.name.as_ref() == "Point");
    check!(compiled.fields == 2);
    check!(compiled.statics == 1);

    let summary: Vec<_> = compiled
        .subroutines
        .iter()
        .map(|s| (s.name.as_ref(), s.kind, s.parameters))
        .collect();
    check!(
        summary
            == [
                ("new", SubroutineKind::Constructor, 2),
                ("getX", SubroutineKind::Method, 0),
                ("plus", SubroutineKind::Method, 1),
                ("total", SubroutineKind::Function, 0),
            ]
    );
    check!(compiled.to_vm().lines().count() == compiled.instructions.len());
}

#[test]
fn implicit_self_call_pushes_this() {
    let lines = vm_lines(
        "class Ball {
            method void draw() { do erase(); return; }
            method void erase() { return; }
        }",
    );
    check!(
        lines[..6]
            == [
                "function Ball.draw 0",
                "push argument 0",
                "pop pointer 0",
                "push pointer 0",
                "call Ball.erase 1",
                "pop temp 0",
            ]
    );
}

#[test]
fn locals_count_every_var_declaration() {
    let lines = vm_lines(&main_with("var int a, b; var Array c; var char d; return;"));
    check!(lines[0] == "function Main.main 4");
}

#[test]
fn output_is_deterministic() {
    let first = compile(POINT, &CompileOptions::default()).unwrap();
    let second = compile(POINT, &CompileOptions::default()).unwrap();
    check!(first == second);
}

#[test]
fn write_to_matches_rendering() {
    let compiled = compile(POINT, &CompileOptions::default()).unwrap();
    let mut out = Vec::new();
    compiled.write_to(&mut out).unwrap();
    check!(String::from_utf8(out).unwrap() == compiled.to_vm());
}

#[test]
fn missing_closing_brace() {
    let source = "class Main { function void main() { return; }";
    let error = error_of(source);
    check!(error.kind_name() == "SyntaxError");
    check!(error.to_string() == "expected `}`, found end of input");
    check!(error.span() == (source.len()..source.len()));
}

#[test]
fn trailing_tokens_after_class() {
    let error = error_of("class A { } class B { }");
    check!(error.kind_name() == "SyntaxError");
    check!(error.to_string() == "expected end of input, found `class`");
}

#[test]
fn syntax_error_points_at_offending_token() {
    let source = main_with("let = 1; return;");
    let error = error_of(&source);
    let_assert!(CompileError::Syntax { expected, found, span } = error);
    check!(expected.as_ref() == "a variable name");
    check!(found.as_ref() == "`=`");
    check!(&source[span] == "=");
}

#[test]
fn lexical_errors_surface_with_their_span() {
    let source = main_with("do Output.printString(\"abc\n); return;");
    let_assert!(CompileError::Lexical(error) = error_of(&source));
    check!(error.error == LexerError::UnterminatedString);
    check!(source[error.span].starts_with("\"abc"));
}

#[test]
fn errors_are_reported_in_source_order() {
    // the bad string comes after the syntax error and is never lexed
    let error = error_of("class Main { function void main() { let ; \"abc");
    check!(error.kind_name() == "SyntaxError");
}

#[test]
fn undefined_variable() {
    let source = main_with("let y = 1; return;");
    let error = error_of(&source);
    check!(error.kind_name() == "SemanticError");
    check!(&source[error.span()] == "y");
    let_assert!(CompileError::Semantic { error, .. } = error);
    check!(error == SemanticError::UndefinedVariable("y".into()));
}

#[test]
fn unknown_qualifier() {
    check!(
        semantic_error_of(&main_with("do Foo.bar(); return;"))
            == SemanticError::UnknownType("Foo".into())
    );
}

#[test]
fn known_types_extend_qualifiers() {
    let mut options = CompileOptions::default();
    options.known_types.insert("Foo");
    let compiled = compile(&main_with("do Foo.bar(); return;"), &options).unwrap();
    check!(compiled.instructions[1] == Instruction::Call("Foo.bar".into(), 0));
}

#[test]
fn duplicate_local() {
    let error = error_of(&main_with("var int a, a; return;"));
    check!(error.kind_name() == "DuplicateSymbolError");
    let_assert!(CompileError::DuplicateSymbol { error, .. } = error);
    check!(
        error
            == SymbolError::Duplicate {
                name: "a".into(),
                scope: Scope::Subroutine
            }
    );
}

#[test]
fn duplicate_field_and_subroutine() {
    let error = error_of("class A { field int x; static char x; }");
    check!(error.kind_name() == "DuplicateSymbolError");

    let error = error_of(
        "class A { function void f() { return; } method void f() { return; } }",
    );
    let_assert!(CompileError::DuplicateSymbol { error, .. } = error);
    check!(
        error
            == SymbolError::Duplicate {
                name: "f".into(),
                scope: Scope::Class
            }
    );
}

#[test]
fn parameters_and_locals_share_a_scope() {
    let error = error_of("class A { function void f(int a) { var int a; return; } }");
    check!(error.kind_name() == "DuplicateSymbolError");
}

#[test]
fn functions_have_no_receiver() {
    let_assert!(
        SemanticError::NoReceiver(_) =
            semantic_error_of("class A { function A f() { return this; } }")
    );
    let_assert!(
        SemanticError::NoReceiver(_) =
            semantic_error_of("class A { field int x; function int f() { return x; } }")
    );
    let_assert!(
        SemanticError::NoReceiver(_) = semantic_error_of(&main_with("do run(); return;"))
    );
}

#[test]
fn argument_count_is_checked_against_earlier_declarations() {
    let error = semantic_error_of(
        "class Main {
            function void f(int a) { return; }
            function void main() { do Main.f(); return; }
        }",
    );
    check!(
        error
            == SemanticError::ArgumentCount {
                callee: "Main.f".into(),
                expected: 1,
                found: 0
            }
    );
}

#[test]
fn call_kind_is_checked_against_earlier_declarations() {
    check!(
        semantic_error_of(
            "class Main {
                method void m() { return; }
                function void main() { do Main.m(); return; }
            }"
        ) == SemanticError::MethodWithoutReceiver("Main.m".into())
    );
    check!(
        semantic_error_of(
            "class Main {
                function void f() { return; }
                method void m() { do f(); return; }
            }"
        ) == SemanticError::NotAMethod("Main.f".into())
    );
}

#[test]
fn later_declarations_are_not_checked() {
    let lines = vm_lines(
        "class Main {
            function void main() { do Main.f(1, 2, 3); return; }
            function void f() { return; }
        }",
    );
    check!(lines[4] == "call Main.f 3");
}

#[test]
fn primitive_receiver() {
    check!(
        semantic_error_of(&main_with("var int n; do n.foo(); return;"))
            == SemanticError::PrimitiveReceiver {
                variable: "n".into(),
                method: "foo".into(),
                ty: "int".into()
            }
    );
}

#[test]
fn every_path_must_return() {
    check!(
        semantic_error_of("class A { function void f() { } }")
            == SemanticError::MissingReturn("f".into())
    );
    check!(
        semantic_error_of("class A { function void f() { if (true) { return; } } }")
            == SemanticError::MissingReturn("f".into())
    );
    check!(
        semantic_error_of("class A { function void f() { while (true) { return; } } }")
            == SemanticError::MissingReturn("f".into())
    );

    let lines = vm_lines(
        "class A { function int f() { if (true) { return 1; } else { return 2; } } }",
    );
    check!(lines.last().map(String::as_str) == Some("label IF_END0"));
}

#[test]
fn statements_after_return_are_unreachable() {
    let lines = vm_lines("class A { function void f() { return; do Output.println(); } }");
    check!(
        lines
            == [
                "function A.f 0",
                "push constant 0",
                "return",
                "call Output.println 0",
                "pop temp 0",
            ]
    );

    let lines = vm_lines(
        "class A { function int f() {
            var int x;
            if (true) { return 1; } else { return 2; }
            let x = 3;
        } }",
    );
    check!(lines[lines.len() - 2..] == ["push constant 3", "pop local 0"]);
}

#[test]
fn return_value_must_match_declaration() {
    check!(
        semantic_error_of(&main_with("return 1;")) == SemanticError::ValueFromVoid("main".into())
    );
    check!(
        semantic_error_of("class A { function int f() { return; } }")
            == SemanticError::MissingReturnValue("f".into())
    );
}

#[test]
fn class_must_match_expected_name() {
    let options = CompileOptions {
        expected_class: Some("Main".into()),
        ..CompileOptions::default()
    };
    let_assert!(Err(CompileError::Semantic { error, .. }) = compile("class Game { }", &options));
    check!(
        error
            == SemanticError::ClassNameMismatch {
                expected: "Main".into(),
                found: "Game".into()
            }
    );
    assert!(compile("class Main { }", &options).is_ok());
}

#[test]
fn empty_source_expects_a_class() {
    let error = error_of("// nothing here\n");
    check!(error.to_string() == "expected `class`, found end of input");
}

#[test]
fn argument_counts_stay_within_operand_range() {
    let zeros = |n: usize| vec!["0"; n].join(",");

    let lines = vm_lines(&main_with(&format!("do Output.printInt({}); return;", zeros(32767))));
    check!(lines[lines.len() - 4] == "call Output.printInt 32767");

    let error = semantic_error_of(&main_with(&format!("do Output.printInt({}); return;", zeros(32768))));
    check!(error == SemanticError::TooMany("arguments".into()));

    // the implicit receiver is one more argument
    let error = semantic_error_of(&format!(
        "class A {{ method void f() {{ do g({}); return; }} }}",
        zeros(32767)
    ));
    check!(error == SemanticError::TooMany("arguments".into()));
}

#[test]
fn local_counts_stay_within_operand_range() {
    let names = |n: usize| (0..n).map(|i| format!("v{i}")).collect::<Vec<_>>().join(", ");

    let lines = vm_lines(&format!("class A {{ function void f() {{ var int {}; return; }} }}", names(32767)));
    check!(lines[0] == "function A.f 32767");

    let source = format!("class A {{ function void f() {{ var int {}; return; }} }}", names(32768));
    let_assert!(CompileError::Semantic { error, span } = error_of(&source));
    check!(error == SemanticError::TooMany("local symbols".into()));
    check!(error.to_string() == "more than 32767 local symbols");
    check!(span.len() == "v32767".len());
}
