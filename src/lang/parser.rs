//! Parser for the embedded debuggee language.
//!
//! Built with `chumsky` for parsing and `ariadne` for pretty diagnostics,
//! over a small grammar of statements and expressions.

use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use chumsky::error::{Rich, RichPattern, RichReason};
use chumsky::prelude::*;
use itertools::Itertools;

use super::ast::{BinOp, Block, Expr, FnDecl, Pos, Program, Stmt, StmtKind, UnOp};

type Err<'a> = extra::Err<Rich<'a, char>>;

/// Maps a byte offset into the source into a 1-based `(line, column)` pair.
///
/// Computed once per parse; the parser reports only byte offsets (chumsky's
/// native currency), and the DAP surface needs line/column pairs, so this is
/// the seam between the two.
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(src: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in src.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    fn pos(&self, offset: usize) -> Pos {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let column = offset - self.line_starts[line_idx];
        Pos {
            line: (line_idx + 1) as u32,
            column: (column + 1) as u32,
        }
    }
}

fn ident<'a>() -> impl Parser<'a, &'a str, String, Err<'a>> + Clone {
    text::ascii::ident()
        .map(|s: &str| s.to_string())
        .padded()
        .labelled("identifier")
}

fn expr<'a>() -> impl Parser<'a, &'a str, Expr, Err<'a>> + Clone {
    recursive(|expr| {
        let int = text::int(10)
            .from_str::<i64>()
            .unwrapped()
            .map(Expr::Int)
            .padded();

        let boolean = just("true")
            .to(Expr::Bool(true))
            .or(just("false").to(Expr::Bool(false)))
            .padded();

        let string = just('"')
            .ignore_then(none_of('"').repeated().to_slice())
            .then_ignore(just('"'))
            .map(|s: &str| Expr::Str(s.to_string()))
            .padded();

        let record = just('{')
            .padded()
            .ignore_then(
                ident()
                    .then_ignore(just(':').padded())
                    .then(expr.clone())
                    .separated_by(just(',').padded())
                    .allow_trailing()
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just('}').padded())
            .map(Expr::Record);

        let array = expr
            .clone()
            .separated_by(just(',').padded())
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just('[').padded(), just(']').padded())
            .map(Expr::Array);

        let call = ident()
            .then(
                expr.clone()
                    .separated_by(just(',').padded())
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .map(|(name, args)| Expr::Call(name, args));

        let atom = choice((
            record,
            array,
            call,
            int,
            boolean,
            string,
            ident().map(Expr::Ident),
            expr.clone().delimited_by(just('(').padded(), just(')').padded()),
        ));

        let postfix = atom.foldl(
            choice((
                just('.').padded().ignore_then(ident()).map(Suffix::Field),
                expr.clone()
                    .delimited_by(just('[').padded(), just(']').padded())
                    .map(Suffix::Index),
            ))
            .repeated(),
            |base, suffix| match suffix {
                Suffix::Field(name) => Expr::Field(Box::new(base), name),
                Suffix::Index(index) => Expr::Index(Box::new(base), Box::new(index)),
            },
        );

        let unary = just('-')
            .padded()
            .to(UnOp::Neg)
            .or(just('!').padded().to(UnOp::Not))
            .repeated()
            .foldr(postfix, |op, rhs| Expr::Unary(op, Box::new(rhs)));

        let product = unary.clone().foldl(
            choice((
                just('*').padded().to(BinOp::Mul),
                just('/').padded().to(BinOp::Div),
            ))
            .then(unary)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        );

        let sum = product.clone().foldl(
            choice((
                just('+').padded().to(BinOp::Add),
                just('-').padded().to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        );

        let comparison = sum.clone().foldl(
            choice((
                just("==").padded().to(BinOp::Eq),
                just("!=").padded().to(BinOp::Neq),
                just("<=").padded().to(BinOp::Le),
                just(">=").padded().to(BinOp::Ge),
                just('<').padded().to(BinOp::Lt),
                just('>').padded().to(BinOp::Gt),
            ))
            .then(sum)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        );

        comparison.clone().foldl(
            choice((
                just("&&").padded().to(BinOp::And),
                just("||").padded().to(BinOp::Or),
            ))
            .then(comparison)
            .repeated(),
            |lhs, (op, rhs)| Expr::Binary(op, Box::new(lhs), Box::new(rhs)),
        )
    })
}

#[derive(Clone)]
enum Suffix {
    Field(String),
    Index(Expr),
}

fn block<'a>(stmt: impl Parser<'a, &'a str, Stmt, Err<'a>> + Clone + 'a) -> impl Parser<'a, &'a str, Block, Err<'a>> + Clone {
    stmt.repeated()
        .collect::<Vec<_>>()
        .delimited_by(just('{').padded(), just('}').padded())
}

fn stmt<'a>() -> impl Parser<'a, &'a str, Stmt, Err<'a>> + Clone {
    recursive(|stmt| {
        let blk = block(stmt.clone());

        let let_stmt = text::ascii::keyword("let")
            .padded()
            .ignore_then(ident())
            .then_ignore(just(":=").padded())
            .then(expr())
            .then_ignore(just(';').padded())
            .map(|(name, value)| StmtKind::Let(name, value));

        let assign_stmt = ident()
            .then_ignore(just('=').padded())
            .then(expr())
            .then_ignore(just(';').padded())
            .map(|(name, value)| StmtKind::Assign(name, value));

        let print_stmt = text::ascii::keyword("print")
            .padded()
            .ignore_then(expr())
            .then_ignore(just(';').padded())
            .map(StmtKind::Print);

        let return_stmt = text::ascii::keyword("return")
            .padded()
            .ignore_then(expr().or_not())
            .then_ignore(just(';').padded())
            .map(StmtKind::Return);

        let if_stmt = text::ascii::keyword("if")
            .padded()
            .ignore_then(expr())
            .then(blk.clone())
            .then(
                text::ascii::keyword("else")
                    .padded()
                    .ignore_then(blk.clone())
                    .or_not(),
            )
            .map(|((cond, then), otherwise)| StmtKind::If(cond, then, otherwise));

        let while_stmt = text::ascii::keyword("while")
            .padded()
            .ignore_then(expr())
            .then(blk.clone())
            .map(|(cond, body)| StmtKind::While(cond, body));

        let fn_decl = text::ascii::keyword("fn")
            .padded()
            .ignore_then(ident())
            .then(
                ident()
                    .separated_by(just(',').padded())
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just('(').padded(), just(')').padded()),
            )
            .then(blk.clone())
            .map(|((name, params), body)| StmtKind::FnDecl(FnDecl { name, params, body }));

        let expr_stmt = expr()
            .then_ignore(just(';').padded())
            .map(StmtKind::ExprStmt);

        choice((
            if_stmt,
            while_stmt,
            fn_decl,
            let_stmt,
            return_stmt,
            print_stmt,
            assign_stmt,
            expr_stmt,
        ))
        .map(|kind| Stmt {
            id: 0,
            pos: Pos { line: 0, column: 0 },
            kind,
        })
    })
}

fn program<'a>() -> impl Parser<'a, &'a str, Vec<(Stmt, std::ops::Range<usize>)>, Err<'a>> {
    stmt()
        .map_with(|s, e| (s, e.span().into_range()))
        .padded()
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
}

/// Parses `src` into a `Program`, assigning each statement a stable node id
/// and a resolved `(line, column)` position.
pub fn parse(src: &str) -> Result<Program, String> {
    let index = LineIndex::new(src);

    let (stmts, errors) = program().parse(src).into_output_errors();

    if let Some(stmts) = stmts {
        if errors.is_empty() {
            let mut next_id = 0u32;
            let body = assign_positions(stmts, &index, &mut next_id);
            return Ok(Program { body });
        }
    }

    Err(render_errors(src, errors))
}

fn assign_positions(
    stmts: Vec<(Stmt, std::ops::Range<usize>)>,
    index: &LineIndex,
    next_id: &mut u32,
) -> Block {
    stmts
        .into_iter()
        .map(|(mut s, span)| {
            s.id = *next_id;
            *next_id += 1;
            s.pos = index.pos(span.start);
            s.kind = assign_nested_positions(s.kind, index, next_id);
            s
        })
        .collect()
}

fn assign_nested_positions(kind: StmtKind, index: &LineIndex, next_id: &mut u32) -> StmtKind {
    match kind {
        StmtKind::If(cond, then, otherwise) => StmtKind::If(
            cond,
            assign_block(then, index, next_id),
            otherwise.map(|b| assign_block(b, index, next_id)),
        ),
        StmtKind::While(cond, body) => StmtKind::While(cond, assign_block(body, index, next_id)),
        StmtKind::FnDecl(mut decl) => {
            decl.body = assign_block(decl.body, index, next_id);
            StmtKind::FnDecl(decl)
        }
        other => other,
    }
}

/// Parses a single expression, as used by `evaluate` and `setVariable`
/// No statement framing, no node id assigned.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let (value, errors) = expr().then_ignore(end()).parse(src).into_output_errors();
    match value {
        Some(expr) if errors.is_empty() => Ok(expr),
        _ => Err(render_errors(src, errors)),
    }
}

fn assign_block(body: Block, index: &LineIndex, next_id: &mut u32) -> Block {
    body.into_iter()
        .map(|mut s| {
            s.id = *next_id;
            *next_id += 1;
            s.kind = assign_nested_positions(s.kind, index, next_id);
            s
        })
        .collect()
}

fn render_errors(src: &str, errors: Vec<Rich<char>>) -> String {
    let mut reports = vec![];

    for err in &errors {
        let report = Report::build(ReportKind::Error, "<program>", err.span().start);

        let report = match err.reason() {
            RichReason::ExpectedFound { expected, found } => report
                .with_message(format!(
                    "{}, expected {}",
                    if found.is_some() {
                        "unexpected token in input"
                    } else {
                        "unexpected end of input"
                    },
                    if expected.is_empty() {
                        "something else".to_string()
                    } else {
                        expected
                            .iter()
                            .map(|e| match e {
                                RichPattern::Token(tok) => tok.to_string(),
                                RichPattern::Label(label) => label.to_string(),
                                RichPattern::Identifier(ident) => ident.to_string(),
                                RichPattern::Any => "anything other than the end of input".to_string(),
                                RichPattern::SomethingElse => {
                                    "something other than the provided input".to_string()
                                }
                                RichPattern::EndOfInput => "end of input".to_string(),
                            })
                            .join(", ")
                    }
                ))
                .with_label(
                    Label::new(("<program>", err.span().into_range()))
                        .with_message(format!(
                            "unexpected token {}",
                            err.found()
                                .map(|t| t.to_string())
                                .unwrap_or_else(|| "EOF".to_string())
                                .fg(Color::Red)
                        ))
                        .with_color(Color::Red),
                ),
            RichReason::Custom(msg) => report.with_message(msg).with_label(
                Label::new(("<program>", err.span().into_range()))
                    .with_message(format!("{}", msg.fg(Color::Red)))
                    .with_color(Color::Red),
            ),
        };

        let mut buf = vec![];
        let _ = report
            .finish()
            .write_for_stdout(("<program>", Source::from(src)), &mut buf);
        reports.push(String::from_utf8_lossy(&buf).into_owned());
    }

    reports.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignments_in_sequence() {
        let prog = parse("let x := 1;\nx = 2;\nx = 3;\n").expect("parse ok");
        assert_eq!(prog.body.len(), 3);
        assert_eq!(prog.body[1].pos.line, 2);
    }

    #[test]
    fn parses_if_while_and_calls() {
        let src = "fn add(a, b) { return a + b; }\nif add(1,2) == 3 { print \"ok\"; }\n";
        let prog = parse(src).expect("parse ok");
        assert!(matches!(prog.body[0].kind, StmtKind::FnDecl(_)));
        assert!(matches!(prog.body[1].kind, StmtKind::If(..)));
    }

    #[test]
    fn reports_syntax_errors() {
        let err = parse("let x := ;").unwrap_err();
        assert!(!err.is_empty());
    }
}
