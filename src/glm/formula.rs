//! Design formula parsing
//!
//! Supports the subset of R model formulae used for count designs:
//! `~ a + b`, interactions `a:b`, crossing `a * b`, `~ 1`, and intercept
//! removal via `0 +` or `- 1`. Column names containing spaces can be
//! written in backticks.

use std::fmt;

use crate::error::{AnalysisError, Result};

/// A parsed design formula
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignFormula {
    pub intercept: bool,
    /// Each term is a list of variables; more than one means an interaction
    pub terms: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Tilde,
    Plus,
    Minus,
    Colon,
    Star,
    Ident(String),
    Number(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '~' => {
                tokens.push(Token::Tilde);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| AnalysisError::InvalidDesign {
                        reason: format!("unterminated backtick in '{}'", input),
                    })?;
                tokens.push(Token::Ident(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(AnalysisError::InvalidDesign {
                    reason: format!("unexpected character '{}' in formula '{}'", other, input),
                })
            }
        }
    }
    Ok(tokens)
}

/// All non-empty sub-products of `vars`, lower order first
fn crossed(vars: &[String]) -> Vec<Vec<String>> {
    let n = vars.len();
    let mut out: Vec<Vec<String>> = (1..(1u32 << n))
        .map(|mask| {
            (0..n)
                .filter(|b| mask & (1 << b) != 0)
                .map(|b| vars[b].clone())
                .collect()
        })
        .collect();
    out.sort_by_key(|t: &Vec<String>| t.len());
    out
}

impl DesignFormula {
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input)?;
        let body = match tokens.first() {
            Some(Token::Tilde) => &tokens[1..],
            _ => &tokens[..],
        };
        if body.is_empty() {
            return Err(AnalysisError::InvalidDesign {
                reason: format!("empty design formula '{}'", input),
            });
        }

        let mut intercept = true;
        let mut terms: Vec<Vec<String>> = Vec::new();
        let mut pos = 0;
        let mut negate = false;

        loop {
            // one additive term: a chain of factors joined by ':' or '*'
            let mut chain: Vec<String> = Vec::new();
            let mut star = false;
            match body.get(pos) {
                Some(Token::Number(n)) => {
                    match (n.as_str(), negate) {
                        ("0", false) | ("1", true) => intercept = false,
                        ("1", false) => intercept = true,
                        _ => {
                            return Err(AnalysisError::InvalidDesign {
                                reason: format!("unsupported constant term '{}' in '{}'", n, input),
                            })
                        }
                    }
                    pos += 1;
                }
                Some(Token::Ident(_)) => {
                    loop {
                        match body.get(pos) {
                            Some(Token::Ident(name)) => chain.push(name.clone()),
                            _ => {
                                return Err(AnalysisError::InvalidDesign {
                                    reason: format!("expected a variable name in '{}'", input),
                                })
                            }
                        }
                        pos += 1;
                        match body.get(pos) {
                            Some(Token::Colon) => pos += 1,
                            Some(Token::Star) => {
                                star = true;
                                pos += 1;
                            }
                            _ => break,
                        }
                    }
                    if negate {
                        return Err(AnalysisError::InvalidDesign {
                            reason: format!("removing variable terms is not supported in '{}'", input),
                        });
                    }
                    let new_terms = if star { crossed(&chain) } else { vec![chain] };
                    for term in new_terms {
                        let mut key = term.clone();
                        key.sort();
                        let exists = terms.iter().any(|t| {
                            let mut k = t.clone();
                            k.sort();
                            k == key
                        });
                        if !exists {
                            terms.push(term);
                        }
                    }
                }
                _ => {
                    return Err(AnalysisError::InvalidDesign {
                        reason: format!("could not parse design formula '{}'", input),
                    })
                }
            }

            match body.get(pos) {
                None => break,
                Some(Token::Plus) => negate = false,
                Some(Token::Minus) => negate = true,
                Some(_) => {
                    return Err(AnalysisError::InvalidDesign {
                        reason: format!("expected '+' or '-' in '{}'", input),
                    })
                }
            }
            pos += 1;
        }

        terms.sort_by_key(|t| t.len());
        Ok(Self { intercept, terms })
    }

    /// Intercept-only design, `~ 1`
    pub fn intercept_only() -> Self {
        Self {
            intercept: true,
            terms: Vec::new(),
        }
    }

    /// Distinct variables referenced by the formula, in order of appearance
    pub fn variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = Vec::new();
        for v in self.terms.iter().flatten() {
            if !vars.contains(v) {
                vars.push(v.clone());
            }
        }
        vars
    }

    /// Last main-effect variable, the usual variable of interest
    pub fn last_variable(&self) -> Option<&str> {
        self.terms.iter().rev().find(|t| t.len() == 1).map(|t| t[0].as_str())
    }
}

fn quote(name: &str) -> String {
    if name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        name.to_string()
    } else {
        format!("`{}`", name)
    }
}

impl fmt::Display for DesignFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        }
        for term in &self.terms {
            parts.push(term.iter().map(|v| quote(v)).collect::<Vec<_>>().join(":"));
        }
        if parts.is_empty() {
            parts.push("1".to_string());
        }
        write!(f, "~ {}", parts.join(" + "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_additive() {
        let f = DesignFormula::parse("~ subject + treatment").unwrap();
        assert!(f.intercept);
        assert_eq!(f.terms, vec![names(&["subject"]), names(&["treatment"])]);
        assert_eq!(f.last_variable(), Some("treatment"));
    }

    #[test]
    fn test_parse_star_expands_and_orders() {
        let f = DesignFormula::parse("~disease*treatment").unwrap();
        assert_eq!(
            f.terms,
            vec![names(&["disease"]), names(&["treatment"]), names(&["disease", "treatment"])]
        );
        assert_eq!(f.to_string(), "~ disease + treatment + disease:treatment");
    }

    #[test]
    fn test_parse_interaction_deduplicated() {
        let f = DesignFormula::parse("~ a:b + a + b + b:a").unwrap();
        assert_eq!(f.terms, vec![names(&["a"]), names(&["b"]), names(&["a", "b"])]);
    }

    #[test]
    fn test_parse_intercept_forms() {
        assert_eq!(DesignFormula::parse("~ 1").unwrap(), DesignFormula::intercept_only());
        assert!(!DesignFormula::parse("~ 0 + group").unwrap().intercept);
        assert!(!DesignFormula::parse("~ group - 1").unwrap().intercept);
    }

    #[test]
    fn test_parse_backticks() {
        let f = DesignFormula::parse("~ `disease state` + treatment").unwrap();
        assert_eq!(f.variables(), names(&["disease state", "treatment"]));
        assert_eq!(f.to_string(), "~ `disease state` + treatment");
    }

    #[test]
    fn test_parse_errors() {
        assert!(DesignFormula::parse("~").is_err());
        assert!(DesignFormula::parse("~ a +").is_err());
        assert!(DesignFormula::parse("~ a / b").is_err());
        assert!(DesignFormula::parse("~ a - b").is_err());
    }
}
