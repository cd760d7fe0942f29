//! Token stream for the imperative cell language.

use logos::Logos;

/// Tokens of the imperative cell language.
///
/// The walker only distinguishes the tokens it acts on; all remaining
/// operators are folded into `Op`. Whitespace and comments are skipped.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
pub enum Token {
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("fn")]
    Fn,
    #[token("import")]
    Import,
    #[token("as")]
    As,

    // Keywords the walker skips or uses for scoping decisions; the slice
    // disambiguates where it matters ("for", "in", "catch").
    #[token("if")]
    #[token("else")]
    #[token("switch")]
    #[token("for")]
    #[token("in")]
    #[token("while")]
    #[token("loop")]
    #[token("do")]
    #[token("until")]
    #[token("return")]
    #[token("break")]
    #[token("continue")]
    #[token("throw")]
    #[token("try")]
    #[token("catch")]
    #[token("export")]
    #[token("private")]
    #[token("this")]
    #[token("true")]
    #[token("false")]
    Keyword,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex(r#""(?:[^"\\]|\\[\s\S])*""#)]
    #[regex(r"`(?:[^`\\]|\\[\s\S])*`")]
    #[regex(r"'(?:[^'\\]|\\[\s\S])'")]
    Str,

    #[regex(r"0x[0-9a-fA-F_]+")]
    #[regex(r"0o[0-7_]+")]
    #[regex(r"0b[01_]+")]
    #[regex(r"[0-9][0-9_]*(\.[0-9][0-9_]*)?([eE][+-]?[0-9]+)?")]
    Number,

    #[token("#{")]
    MapOpen,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token(".")]
    #[token("?.")]
    Dot,
    #[token("::")]
    PathSep,
    #[token(":")]
    Colon,
    #[token("=>")]
    FatArrow,

    #[token("=")]
    Assign,

    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("**=")]
    #[token("<<=")]
    #[token(">>=")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    AugAssign,

    #[token("|")]
    Pipe,

    #[token("==")]
    #[token("!=")]
    #[token("<=")]
    #[token(">=")]
    #[token("&&")]
    #[token("||")]
    #[token("**")]
    #[token("<<")]
    #[token(">>")]
    #[token("..=")]
    #[token("..")]
    #[token("??")]
    #[token("?[")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("&")]
    #[token("^")]
    #[token("!")]
    #[token("<")]
    #[token(">")]
    #[token("?")]
    Op,
}

/// Lex source into `(token, slice)` pairs.
///
/// Returns `None` on any unrecognized input, which the extractor treats as a
/// parse failure.
pub fn tokenize(source: &str) -> Option<Vec<(Token, &str)>> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.slice())),
            Err(()) => return None,
        }
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_assignment() {
        let tokens = tokenize("let x = 10;").unwrap();
        let kinds: Vec<Token> = tokens.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            kinds,
            vec![Token::Let, Token::Ident, Token::Assign, Token::Number, Token::Semi]
        );
        assert_eq!(tokens[1].1, "x");
    }

    #[test]
    fn test_tokenize_skips_comments() {
        let tokens = tokenize("// line\n/* block\n still block */ x").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].1, "x");
    }

    #[test]
    fn test_aug_assign_is_single_token() {
        let tokens = tokenize("x += 1").unwrap();
        assert_eq!(tokens[1].0, Token::AugAssign);
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(tokenize("let s = \"oops").is_none());
    }

    #[test]
    fn test_map_literal_and_paths() {
        let tokens = tokenize("#{ a: 1 }; m::f()").unwrap();
        assert_eq!(tokens[0].0, Token::MapOpen);
        assert!(tokens.iter().any(|(t, _)| *t == Token::PathSep));
    }
}
