use crate::error::LegatoError;
use crate::score::BarKind;

/// Token types for the supported ABC subset
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Information field on its own line: X:1, T:Title, K:G
    Field { name: char, value: String },

    // Note names (A-G, a-g) and rests (z, x)
    Note(char),
    Rest(char),

    // Accidentals
    Sharp,   // ^
    Flat,    // _
    Natural, // =

    // Octave marks
    OctaveUp,   // '
    OctaveDown, // ,

    // Lengths
    Number(u32),
    Slash,

    // Chords
    ChordStart, // [
    ChordEnd,   // ]

    Tie, // -

    Bar(BarKind),

    Whitespace,
    Newline,
}

/// A token with its position in the source.
///
/// `start`/`end` are character offsets; `line`/`column` are 1-based for error messages.
#[derive(Debug, Clone)]
pub struct LocatedToken {
    pub token: Token,
    pub line: usize,
    pub column: usize,
    pub start: usize,
    pub end: usize,
}

/// Lexer for tokenizing ABC source
pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    position: usize,
    offset: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
            position: 0,
            offset: 0,
        }
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        self.offset += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn at_line_start(&self) -> bool {
        self.column == 1
    }

    fn check_field(&self) -> bool {
        let mut rest = self.input[self.position..].chars();
        matches!(
            (rest.next(), rest.next()),
            (Some(name), Some(':')) if name.is_ascii_alphabetic()
        )
    }

    fn skip_until(&mut self, stop: char) {
        while let Some(&c) = self.peek() {
            if c == stop || c == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn error(line: usize, column: usize, message: impl Into<String>) -> LegatoError {
        LegatoError::Compile {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<LocatedToken>, LegatoError> {
        let mut tokens = Vec::new();

        while let Some(&c) = self.peek() {
            let line = self.line;
            let column = self.column;
            let start = self.offset;

            if self.at_line_start() && self.check_field() {
                let name = c;
                self.advance(); // name
                self.advance(); // :
                let value_start = self.position;
                self.skip_until('\n');
                let value = self.input[value_start..self.position].trim();
                // Trailing comments are not part of the value
                let value = value.split('%').next().unwrap_or("").trim().to_string();
                tokens.push(LocatedToken {
                    token: Token::Field { name, value },
                    line,
                    column,
                    start,
                    end: self.offset,
                });
                continue;
            }

            let token = match c {
                '%' => {
                    self.skip_until('\n');
                    continue;
                }
                '"' => {
                    // Chord symbols and annotations
                    self.advance();
                    self.skip_until('"');
                    if self.peek() != Some(&'"') {
                        return Err(Self::error(line, column, "Unterminated quoted string"));
                    }
                    self.advance();
                    continue;
                }
                '!' | '+' => {
                    // Decorations: !trill!, +fermata+
                    let delimiter = c;
                    self.advance();
                    self.skip_until(delimiter);
                    if self.peek() != Some(&delimiter) {
                        return Err(Self::error(line, column, "Unterminated decoration"));
                    }
                    self.advance();
                    continue;
                }
                '(' | ')' | '.' | '~' => {
                    // Slurs and single-character decorations carry no timing
                    self.advance();
                    continue;
                }
                'A'..='G' | 'a'..='g' => {
                    self.advance();
                    Token::Note(c)
                }
                'z' | 'x' => {
                    self.advance();
                    Token::Rest(c)
                }
                '^' => {
                    self.advance();
                    Token::Sharp
                }
                '_' => {
                    self.advance();
                    Token::Flat
                }
                '=' => {
                    self.advance();
                    Token::Natural
                }
                '\'' => {
                    self.advance();
                    Token::OctaveUp
                }
                ',' => {
                    self.advance();
                    Token::OctaveDown
                }
                '0'..='9' => {
                    let digits_start = self.position;
                    while let Some(d) = self.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        self.advance();
                    }
                    let digits = &self.input[digits_start..self.position];
                    let value = digits
                        .parse::<u32>()
                        .map_err(|_| Self::error(line, column, format!("Number '{}' is too large", digits)))?;
                    Token::Number(value)
                }
                '/' => {
                    self.advance();
                    Token::Slash
                }
                '[' => {
                    self.advance();
                    if let Some(&'|') = self.peek() {
                        self.advance();
                        Token::Bar(BarKind::Start)
                    } else {
                        Token::ChordStart
                    }
                }
                ']' => {
                    self.advance();
                    Token::ChordEnd
                }
                '-' => {
                    self.advance();
                    Token::Tie
                }
                '|' => {
                    self.advance();
                    let kind = match self.peek() {
                        Some(&']') => {
                            self.advance();
                            BarKind::Final
                        }
                        Some(&'|') => {
                            self.advance();
                            BarKind::Double
                        }
                        Some(&':') => {
                            self.advance();
                            BarKind::RepeatStart
                        }
                        _ => BarKind::Single,
                    };
                    // Volta endings (|1, |2) belong to the barline
                    while let Some(d) = self.peek() {
                        if !d.is_ascii_digit() {
                            break;
                        }
                        self.advance();
                    }
                    Token::Bar(kind)
                }
                ':' => {
                    self.advance();
                    match self.peek() {
                        Some(&'|') => {
                            self.advance();
                            if let Some(&':') = self.peek() {
                                self.advance();
                                Token::Bar(BarKind::RepeatBoth)
                            } else {
                                Token::Bar(BarKind::RepeatEnd)
                            }
                        }
                        Some(&':') => {
                            self.advance();
                            Token::Bar(BarKind::RepeatBoth)
                        }
                        _ => {
                            return Err(Self::error(
                                line,
                                column,
                                "Unexpected ':'. Did you mean ':|' for repeat end?",
                            ));
                        }
                    }
                }
                '\n' => {
                    self.advance();
                    Token::Newline
                }
                ' ' | '\t' | '\r' | '`' => {
                    self.advance();
                    Token::Whitespace
                }
                '\\' => {
                    // Line continuation
                    self.advance();
                    Token::Whitespace
                }
                _ => {
                    return Err(Self::error(
                        line,
                        column,
                        format!("Unexpected character '{}'", c),
                    ));
                }
            };

            tokens.push(LocatedToken {
                token,
                line,
                column,
                start,
                end: self.offset,
            });
        }

        Ok(tokens)
    }
}
