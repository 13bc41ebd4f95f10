//! Script blocks: scripted actions attached to a generation range and
//! an event kind.
//!
//! A top-level script is a sequence of block declarations:
//!
//! ```text
//! initialize { ... }
//! 1 early { ... }
//! 100:200 late { ... }
//! 1:1000 fitness(m1) { ... }
//! ```
//!
//! An absent kind defaults to "early"; `initialize` blocks take no
//! generation range. The body is parsed and optimized once at
//! registration.

use std::rc::Rc;

use demevo_script::parser::parse_and_optimize;
use demevo_script::token::{tokenize, Token, TokenKind};
use demevo_script::{AstNode, ErrorKind, FunctionRegistry, ScriptError, ScriptResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockKind {
    Early,
    Late,
    Initialize,
    /// Fitness callback, optionally restricted to one mutation type
    /// (by its script symbol, e.g. "m1").
    Fitness(Option<String>),
    MateChoice,
    ModifyChild,
    Recombination,
}

impl BlockKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Early => "early",
            Self::Late => "late",
            Self::Initialize => "initialize",
            Self::Fitness(_) => "fitness",
            Self::MateChoice => "mateChoice",
            Self::ModifyChild => "modifyChild",
            Self::Recombination => "recombination",
        }
    }
}

#[derive(Debug)]
pub struct ScriptBlock {
    pub id: i64,
    pub start: i64,
    pub end: i64,
    pub kind: BlockKind,
    pub source: String,
    pub root: Rc<AstNode>,
    pub active: bool,
}

impl ScriptBlock {
    /// Whether this block runs in `generation` (activation range is
    /// inclusive; inactive blocks never run).
    pub fn applies_to(&self, generation: i64) -> bool {
        self.active && generation >= self.start && generation <= self.end
    }
}

/// Parse a top-level script into its blocks.
pub fn parse_script(
    source: &str,
    registry: &FunctionRegistry,
) -> ScriptResult<Vec<ScriptBlock>> {
    let tokens = tokenize(source)?;
    let mut blocks = Vec::new();
    let mut pos = 0usize;
    let mut next_id = 1i64;

    while tokens[pos].kind != TokenKind::Eof {
        let (block, next) = parse_block(source, &tokens, pos, registry, next_id)?;
        blocks.push(block);
        next_id += 1;
        pos = next;
    }
    Ok(blocks)
}

fn parse_block(
    source: &str,
    tokens: &[Token],
    mut pos: usize,
    registry: &FunctionRegistry,
    id: i64,
) -> ScriptResult<(ScriptBlock, usize)> {
    let unexpected = |tok: &Token, expected: &str| {
        ScriptError::at(
            ErrorKind::Parse,
            format!("unexpected {}; expected {expected}", tok.kind.describe()),
            tok.pos,
        )
    };

    // optional generation range
    let mut range: Option<(i64, i64)> = None;
    if tokens[pos].kind == TokenKind::IntLiteral {
        let start = parse_generation(&tokens[pos])?;
        pos += 1;
        let end = if tokens[pos].kind == TokenKind::Colon {
            pos += 1;
            if tokens[pos].kind != TokenKind::IntLiteral {
                return Err(unexpected(&tokens[pos], "a generation number"));
            }
            let end = parse_generation(&tokens[pos])?;
            pos += 1;
            end
        } else {
            start
        };
        if end < start {
            return Err(ScriptError::at(
                ErrorKind::Parse,
                format!("script block range {start}:{end} is inverted"),
                tokens[pos - 1].pos,
            ));
        }
        range = Some((start, end));
    }

    // optional event kind
    let mut kind = BlockKind::Early;
    if tokens[pos].kind == TokenKind::Identifier {
        kind = match tokens[pos].text.as_str() {
            "early" => BlockKind::Early,
            "late" => BlockKind::Late,
            "initialize" => BlockKind::Initialize,
            "fitness" => BlockKind::Fitness(None),
            "mateChoice" => BlockKind::MateChoice,
            "modifyChild" => BlockKind::ModifyChild,
            "recombination" => BlockKind::Recombination,
            other => {
                return Err(ScriptError::at(
                    ErrorKind::Parse,
                    format!("unknown script block type {other}"),
                    tokens[pos].pos,
                ));
            }
        };
        pos += 1;

        // fitness takes an optional parenthesized mutation-type symbol
        if tokens[pos].kind == TokenKind::LParen {
            if !matches!(kind, BlockKind::Fitness(_)) {
                return Err(unexpected(&tokens[pos], "'{'"));
            }
            pos += 1;
            if tokens[pos].kind != TokenKind::Identifier {
                return Err(unexpected(&tokens[pos], "a mutation-type identifier"));
            }
            kind = BlockKind::Fitness(Some(tokens[pos].text.clone()));
            pos += 1;
            if tokens[pos].kind != TokenKind::RParen {
                return Err(unexpected(&tokens[pos], "')'"));
            }
            pos += 1;
        }
    }

    let (start, end) = match (range, &kind) {
        (None, BlockKind::Initialize) => (0, 0),
        (Some(_), BlockKind::Initialize) => {
            return Err(ScriptError::at(
                ErrorKind::Parse,
                "initialize blocks take no generation range",
                tokens[pos].pos,
            ));
        }
        (Some(r), _) => r,
        (None, _) => {
            return Err(ScriptError::at(
                ErrorKind::Parse,
                "script block requires a generation range",
                tokens[pos].pos,
            ));
        }
    };

    if tokens[pos].kind != TokenKind::LBrace {
        return Err(unexpected(&tokens[pos], "'{'"));
    }
    let open = pos;
    let mut depth = 0usize;
    let close = loop {
        match tokens[pos].kind {
            TokenKind::LBrace => depth += 1,
            TokenKind::RBrace => {
                depth -= 1;
                if depth == 0 {
                    break pos;
                }
            }
            TokenKind::Eof => {
                return Err(ScriptError::at(
                    ErrorKind::Parse,
                    "unterminated script block",
                    tokens[open].pos,
                ));
            }
            _ => {}
        }
        pos += 1;
    };

    let body_start = tokens[open].pos + 1;
    let body_end = tokens[close].pos;
    let body = source[body_start..body_end].to_string();
    let root = Rc::new(parse_and_optimize(&body, registry)?);

    Ok((
        ScriptBlock {
            id,
            start,
            end,
            kind,
            source: body,
            root,
            active: true,
        },
        close + 1,
    ))
}

fn parse_generation(token: &Token) -> ScriptResult<i64> {
    demevo_script::token::int_literal_value(&token.text).ok_or_else(|| {
        ScriptError::at(ErrorKind::Parse, "generation out of range", token.pos)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<ScriptBlock> {
        parse_script(source, &FunctionRegistry::standard()).unwrap()
    }

    #[test]
    fn test_initialize_block() {
        let blocks = parse("initialize { initializeMutationRate(1e-7); }");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, BlockKind::Initialize);
        assert_eq!((blocks[0].start, blocks[0].end), (0, 0));
    }

    #[test]
    fn test_default_kind_is_early() {
        let blocks = parse("5 { print('hello'); }");
        assert_eq!(blocks[0].kind, BlockKind::Early);
        assert_eq!((blocks[0].start, blocks[0].end), (5, 5));
    }

    #[test]
    fn test_generation_ranges() {
        let blocks = parse("10:20 late { print(1); }");
        assert_eq!(blocks[0].kind, BlockKind::Late);
        assert_eq!((blocks[0].start, blocks[0].end), (10, 20));
        assert!(blocks[0].applies_to(10));
        assert!(blocks[0].applies_to(15));
        assert!(blocks[0].applies_to(20));
        assert!(!blocks[0].applies_to(21));
    }

    #[test]
    fn test_fitness_block_with_type() {
        let blocks = parse("1:100 fitness(m1) { return relFitness; }");
        assert_eq!(blocks[0].kind, BlockKind::Fitness(Some("m1".into())));
    }

    #[test]
    fn test_multiple_blocks_and_ids() {
        let src = "
            initialize { initializeMutationRate(1e-7); }
            1 early { x = 1; }
            1:10 late { x = 2; }
            5 mateChoice { return NULL; }
        ";
        let blocks = parse(src);
        assert_eq!(blocks.len(), 4);
        let ids: Vec<i64> = blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(blocks[3].kind, BlockKind::MateChoice);
    }

    #[test]
    fn test_nested_braces_in_body() {
        let blocks = parse("1 { if (T) { x = 1; } else { x = 2; } }");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].source.contains("else"));
    }

    #[test]
    fn test_missing_generation_is_error() {
        let err = parse_script("late { x = 1; }", &FunctionRegistry::standard()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
        assert!(err.message.contains("generation range"));
    }

    #[test]
    fn test_initialize_with_generation_is_error() {
        let err =
            parse_script("1 initialize { }", &FunctionRegistry::standard()).unwrap_err();
        assert!(err.message.contains("no generation range"));
    }

    #[test]
    fn test_inverted_range_is_error() {
        let err = parse_script("10:5 { x = 1; }", &FunctionRegistry::standard()).unwrap_err();
        assert!(err.message.contains("inverted"));
    }

    #[test]
    fn test_unknown_kind_is_error() {
        let err =
            parse_script("1 sometimes { x = 1; }", &FunctionRegistry::standard()).unwrap_err();
        assert!(err.message.contains("unknown script block type"));
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse_script("1 { x = 1;", &FunctionRegistry::standard()).unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_body_parse_errors_surface() {
        let err = parse_script("1 { x = ; }", &FunctionRegistry::standard()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Parse);
    }

    #[test]
    fn test_inactive_block_never_applies() {
        let mut blocks = parse("1:10 { x = 1; }");
        blocks[0].active = false;
        assert!(!blocks[0].applies_to(5));
    }
}
