//! Top-level dependency walker for imperative cells.

use std::collections::BTreeSet;
use std::mem;

use super::DepSets;
use super::builtins::is_builtin;
use super::lexer::{Token, tokenize};

/// Extract `(reads, writes)` from imperative cell source.
///
/// Walks the token stream tracking a scope stack whose bottom is the
/// notebook-level scope. Any lexing or structural failure yields empty sets;
/// the cell is treated as not yet analyzable.
pub fn extract_imperative(code: &str) -> DepSets {
    tokenize(code)
        .and_then(|tokens| Walker::default().run(&tokens))
        .unwrap_or_default()
}

#[derive(Default)]
struct Walker {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
    /// Names assigned at the top level so far; reads of these are internal.
    top_assigned: BTreeSet<String>,
    /// `let` bindings of enclosing blocks, innermost last.
    block_locals: Vec<BTreeSet<String>>,
    /// Loop variables and catch bindings waiting for their block to open.
    pending_locals: BTreeSet<String>,
}

impl Walker {
    fn run(mut self, tokens: &[(Token, &str)]) -> Option<DepSets> {
        let mut i = 0;
        while i < tokens.len() {
            let (token, slice) = tokens[i];
            match token {
                Token::Let | Token::Const => {
                    let (_, name) = tokens
                        .get(i + 1)
                        .filter(|(t, _)| *t == Token::Ident)
                        .copied()?;
                    self.bind(name);
                    i += 2;
                }
                Token::Fn => i = self.skip_function(tokens, i)?,
                Token::Import => i = self.handle_import(tokens, i)?,
                Token::Keyword => match slice {
                    "for" => i = self.collect_header_locals(tokens, i + 1),
                    "catch" => i = self.collect_header_locals(tokens, i + 1),
                    _ => i += 1,
                },
                Token::LBrace | Token::MapOpen => {
                    self.block_locals.push(mem::take(&mut self.pending_locals));
                    i += 1;
                }
                Token::RBrace => {
                    self.block_locals.pop()?;
                    i += 1;
                }
                Token::Dot | Token::PathSep => {
                    // Property, method, or module-member name; never a variable.
                    i += match tokens.get(i + 1) {
                        Some((Token::Ident, _)) => 2,
                        _ => 1,
                    };
                }
                Token::Ident => {
                    i = self.handle_ident(tokens, i, slice);
                }
                _ => i += 1,
            }
        }
        if !self.block_locals.is_empty() {
            return None;
        }
        Some(DepSets {
            reads: self.reads,
            writes: self.writes,
        })
    }

    fn handle_ident(&mut self, tokens: &[(Token, &str)], i: usize, name: &str) -> usize {
        match tokens.get(i + 1).map(|(t, _)| *t) {
            Some(Token::Assign) => {
                self.store(name);
                i + 2
            }
            Some(Token::AugAssign) => {
                // Augmented assignment is both a read and a write.
                if !self.is_block_local(name) {
                    if !is_builtin(name) {
                        self.reads.insert(name.to_string());
                    }
                    self.store(name);
                }
                i + 2
            }
            Some(Token::Colon) => {
                // Map-literal key.
                i + 2
            }
            _ => {
                self.load(name);
                i + 1
            }
        }
    }

    fn bind(&mut self, name: &str) {
        match self.block_locals.last_mut() {
            Some(locals) => {
                locals.insert(name.to_string());
            }
            None => {
                self.writes.insert(name.to_string());
                self.top_assigned.insert(name.to_string());
            }
        }
    }

    fn store(&mut self, name: &str) {
        if !self.is_block_local(name) {
            self.writes.insert(name.to_string());
            self.top_assigned.insert(name.to_string());
        }
    }

    fn load(&mut self, name: &str) {
        if name == "_"
            || name == "this"
            || self.is_block_local(name)
            || self.top_assigned.contains(name)
            || is_builtin(name)
        {
            return;
        }
        self.reads.insert(name.to_string());
    }

    fn is_block_local(&self, name: &str) -> bool {
        self.block_locals.iter().any(|scope| scope.contains(name))
    }

    /// Record the defined name; the body contributes nothing.
    fn skip_function(&mut self, tokens: &[(Token, &str)], i: usize) -> Option<usize> {
        let (_, name) = tokens
            .get(i + 1)
            .filter(|(t, _)| *t == Token::Ident)
            .copied()?;
        if self.block_locals.is_empty() {
            self.writes.insert(name.to_string());
        }
        let mut j = i + 2;
        if tokens.get(j).map(|(t, _)| *t) != Some(Token::LParen) {
            return None;
        }
        j = skip_balanced(tokens, j, Token::LParen, Token::RParen)?;
        if tokens.get(j).map(|(t, _)| *t) != Some(Token::LBrace) {
            return None;
        }
        skip_balanced(tokens, j, Token::LBrace, Token::RBrace)
    }

    /// `import "path"` binds nothing; `import "path" as name` writes `name`.
    fn handle_import(&mut self, tokens: &[(Token, &str)], i: usize) -> Option<usize> {
        let mut j = i + 1;
        if tokens.get(j).map(|(t, _)| *t) != Some(Token::Str) {
            return None;
        }
        j += 1;
        if tokens.get(j).map(|(t, _)| *t) == Some(Token::As) {
            let (_, name) = tokens
                .get(j + 1)
                .filter(|(t, _)| *t == Token::Ident)
                .copied()?;
            if self.block_locals.is_empty() {
                self.writes.insert(name.to_string());
                self.top_assigned.insert(name.to_string());
            }
            j += 2;
        }
        Some(j)
    }

    /// Loop variables (`for x in …`, `for (k, v) in …`) and catch bindings
    /// are scoped to the block that follows.
    fn collect_header_locals(&mut self, tokens: &[(Token, &str)], mut i: usize) -> usize {
        match tokens.get(i) {
            Some((Token::Ident, name)) => {
                self.pending_locals.insert((*name).to_string());
                i + 1
            }
            Some((Token::LParen, _)) => {
                i += 1;
                while let Some((token, slice)) = tokens.get(i) {
                    match token {
                        Token::RParen => return i + 1,
                        Token::Ident => {
                            self.pending_locals.insert((*slice).to_string());
                            i += 1;
                        }
                        _ => i += 1,
                    }
                }
                i
            }
            _ => i,
        }
    }
}

/// Advance past a balanced `open`…`close` region starting at `start`
/// (which must hold `open`). Map literals count as brace openers.
fn skip_balanced(
    tokens: &[(Token, &str)],
    start: usize,
    open: Token,
    close: Token,
) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = start;
    while let Some((token, _)) = tokens.get(i) {
        if *token == open || (open == Token::LBrace && *token == Token::MapOpen) {
            depth += 1;
        } else if *token == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + 1);
            }
        }
        i += 1;
    }
    None
}
