//! The `--tokens` dump: one XML element per token, tagged with its kind.
use jackc::{Lexer, LexicalError};

pub fn dump(source: &str) -> Result<String, LexicalError> {
    let mut out = String::from("<tokens>\n");
    for token in Lexer::new(source) {
        let token = token?;
        let tag = token.kind.tag();
        out.push_str(&format!("<{tag}> {} </{tag}>\n", token.escaped_lexeme()));
    }
    out.push_str("</tokens>\n");
    Ok(out)
}
