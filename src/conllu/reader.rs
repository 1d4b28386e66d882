//! Streaming reader for tokenised CoNLL-U sentences.
//!
//! Sentences are blocks of tab-separated token lines preceded by `#`
//! metadata lines and terminated by a blank line. Token lines carry the ten
//! standard fields; `_` marks an absent value. Multi-word ranges (`3-4`)
//! and empty nodes (`5.1`) are recognised so downstream stages can filter
//! them.

use crate::error::{Error, Result};
use std::io::BufRead;

/// Number of tab-separated fields in a token line.
const TOKEN_FIELDS: usize = 10;

/// CoNLL-U token identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenId {
    /// Regular word index, 1-based within the sentence.
    Single(u32),
    /// Multi-word token range, e.g. `3-4`.
    Range(u32, u32),
    /// Empty node, e.g. `5.1`.
    Empty(u32, u32),
}

impl TokenId {
    pub fn is_word(&self) -> bool {
        matches!(self, TokenId::Single(_))
    }
}

/// One tokenised word with its annotation fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: TokenId,
    pub form: String,
    pub lemma: Option<String>,
    pub upos: Option<String>,
    pub xpos: Option<String>,
    pub feats: Vec<(String, String)>,
    pub head: Option<u32>,
    pub deprel: Option<String>,
    pub misc: Vec<(String, String)>,
}

/// One sentence: ordered metadata plus tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sentence {
    pub metadata: Vec<(String, String)>,
    pub tokens: Vec<Token>,
}

impl Sentence {
    /// First metadata value for `key`, if present.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether this sentence opens a new document scope.
    pub fn is_document_start(&self) -> bool {
        self.metadata
            .iter()
            .any(|(k, _)| k == "newdoc" || k == "newdoc id")
    }

    /// Word tokens only (no multi-word ranges, no empty nodes).
    pub fn words(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.id.is_word())
    }
}

/// Streaming sentence iterator over a CoNLL-U source.
pub struct ConlluReader<R> {
    reader: R,
    line_number: usize,
    done: bool,
}

impl<R: BufRead> ConlluReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_number: 0,
            done: false,
        }
    }

    fn parse_error(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            line: self.line_number,
            message: message.into(),
        }
    }

    fn read_sentence(&mut self) -> Result<Option<Sentence>> {
        let mut sentence = Sentence::default();
        let mut saw_content = false;
        let mut line = String::new();

        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| Error::io("corpus stream", e))?;
            if read == 0 {
                self.done = true;
                return Ok(if saw_content { Some(sentence) } else { None });
            }
            self.line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);

            if trimmed.is_empty() {
                if saw_content {
                    return Ok(Some(sentence));
                }
                continue;
            }
            saw_content = true;

            if let Some(comment) = trimmed.strip_prefix('#') {
                sentence.metadata.push(parse_metadata(comment));
            } else {
                sentence.tokens.push(self.parse_token_line(trimmed)?);
            }
        }
    }

    fn parse_token_line(&self, line: &str) -> Result<Token> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != TOKEN_FIELDS {
            return Err(self.parse_error(format!(
                "expected {} tab-separated fields, found {}",
                TOKEN_FIELDS,
                fields.len()
            )));
        }
        let id = self.parse_token_id(fields[0])?;
        if fields[1].is_empty() {
            return Err(self.parse_error("empty token form"));
        }
        let head = match fields[6] {
            "_" => None,
            raw => Some(
                raw.parse::<u32>()
                    .map_err(|_| self.parse_error(format!("invalid head '{}'", raw)))?,
            ),
        };
        Ok(Token {
            id,
            form: fields[1].to_string(),
            lemma: absent(fields[2]),
            upos: absent(fields[3]),
            xpos: absent(fields[4]),
            feats: parse_pairs(fields[5]),
            head,
            deprel: absent(fields[7]),
            misc: parse_pairs(fields[9]),
        })
    }

    fn parse_token_id(&self, raw: &str) -> Result<TokenId> {
        if let Ok(id) = raw.parse::<u32>() {
            return Ok(TokenId::Single(id));
        }
        if let Some((first, last)) = raw.split_once('-') {
            let first = first
                .parse::<u32>()
                .map_err(|_| self.parse_error(format!("invalid token id '{}'", raw)))?;
            let last = last
                .parse::<u32>()
                .map_err(|_| self.parse_error(format!("invalid token id '{}'", raw)))?;
            return Ok(TokenId::Range(first, last));
        }
        if let Some((base, sub)) = raw.split_once('.') {
            let base = base
                .parse::<u32>()
                .map_err(|_| self.parse_error(format!("invalid token id '{}'", raw)))?;
            let sub = sub
                .parse::<u32>()
                .map_err(|_| self.parse_error(format!("invalid token id '{}'", raw)))?;
            return Ok(TokenId::Empty(base, sub));
        }
        Err(self.parse_error(format!("invalid token id '{}'", raw)))
    }
}

impl<R: BufRead> Iterator for ConlluReader<R> {
    type Item = Result<Sentence>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.read_sentence().transpose()
    }
}

fn absent(field: &str) -> Option<String> {
    if field == "_" {
        None
    } else {
        Some(field.to_string())
    }
}

/// Parse `A=B|C=D` annotation bundles (FEATS, MISC). A bare flag without
/// `=` keeps an empty value.
fn parse_pairs(field: &str) -> Vec<(String, String)> {
    if field == "_" {
        return Vec::new();
    }
    field
        .split('|')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

/// Parse a `# key = value` metadata line; bare markers keep an empty value.
fn parse_metadata(comment: &str) -> (String, String) {
    match comment.split_once('=') {
        Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
        None => (comment.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
# newdoc id = D1
# sent_id = s1
# text = The cat sleeps.
1\tThe\tthe\tDET\t_\t_\t3\tdet\t_\t_
2\tcat\tcat\tNOUN\t_\tNumber=Sing\t3\tnsubj\t_\t_
3\tsleeps\tsleep\tVERB\t_\t_\t0\troot\t_\tSpaceAfter=No
4\t.\t.\tPUNCT\t_\t_\t3\tpunct\t_\t_

# sent_id = s2
1\tIt\tit\tPRON\t_\t_\t2\tnsubj\t_\t_
2\truns\trun\tVERB\t_\t_\t0\troot\t_\t_
";

    fn read_all(input: &str) -> Vec<Sentence> {
        ConlluReader::new(Cursor::new(input))
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_reads_sentences_and_metadata() {
        let sentences = read_all(SAMPLE);
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].meta("newdoc id"), Some("D1"));
        assert_eq!(sentences[0].meta("text"), Some("The cat sleeps."));
        assert!(sentences[0].is_document_start());
        assert!(!sentences[1].is_document_start());
        assert_eq!(sentences[0].tokens.len(), 4);
        assert_eq!(sentences[1].tokens.len(), 2);
    }

    #[test]
    fn test_token_fields() {
        let sentences = read_all(SAMPLE);
        let cat = &sentences[0].tokens[1];
        assert_eq!(cat.id, TokenId::Single(2));
        assert_eq!(cat.form, "cat");
        assert_eq!(cat.lemma.as_deref(), Some("cat"));
        assert_eq!(cat.upos.as_deref(), Some("NOUN"));
        assert_eq!(cat.xpos, None);
        assert_eq!(cat.feats, vec![("Number".to_string(), "Sing".to_string())]);
        assert_eq!(cat.head, Some(3));
        assert_eq!(cat.deprel.as_deref(), Some("nsubj"));

        let sleeps = &sentences[0].tokens[2];
        assert_eq!(sleeps.head, Some(0));
        assert_eq!(
            sleeps.misc,
            vec![("SpaceAfter".to_string(), "No".to_string())]
        );
    }

    #[test]
    fn test_multiword_and_empty_ids() {
        let input = "\
1-2\tIt's\t_\t_\t_\t_\t_\t_\t_\t_
1\tIt\tit\tPRON\t_\t_\t0\troot\t_\t_
2\t's\tbe\tAUX\t_\t_\t1\tcop\t_\t_
3.1\tghost\t_\t_\t_\t_\t_\t_\t_\t_
";
        let sentences = read_all(input);
        assert_eq!(sentences[0].tokens[0].id, TokenId::Range(1, 2));
        assert_eq!(sentences[0].tokens[3].id, TokenId::Empty(3, 1));
        let words: Vec<&str> = sentences[0].words().map(|t| t.form.as_str()).collect();
        assert_eq!(words, vec!["It", "'s"]);
    }

    #[test]
    fn test_malformed_line_is_parse_error() {
        let input = "1\tonly\tthree\n";
        let result: Result<Vec<Sentence>> =
            ConlluReader::new(Cursor::new(input)).collect();
        assert!(matches!(result, Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn test_trailing_blank_lines() {
        let sentences = read_all("1\ta\t_\t_\t_\t_\t0\troot\t_\t_\n\n\n");
        assert_eq!(sentences.len(), 1);
    }
}
