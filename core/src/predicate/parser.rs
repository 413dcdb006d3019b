use rust_decimal::Decimal;
use super::{BinaryOp, Expr, Func, PredicateError, UnaryOp};

///
/// Parse a condition expression into an AST.
///
/// The grammar, loosest-binding first: -
///
///   expr    := and ( '||' and )*
///   and     := cmp ( '&&' cmp )*
///   cmp     := sum ( ( '==' | '!=' | '<' | '<=' | '>' | '>=' | 'contains' | 'matches' ) sum )?
///   sum     := term ( ( '+' | '-' ) term )*
///   term    := unary ( ( '*' | '/' ) unary )*
///   unary   := ( '!' | '-' ) unary | primary
///   primary := number | 'string' | true | false | null
///            | func '(' expr ( ',' expr )* ')'
///            | ident '.' ident | ident '[' 'string' ']'
///            | '(' expr ')'
///
pub fn parse(input: &str) -> Result<Expr, PredicateError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0, len: input.len() };
    let expr = parser.expr()?;

    match parser.peek() {
        None => Ok(expr),
        Some((_, position)) => Err(PredicateError::Syntax {
            position: *position,
            message: "unexpected trailing input".into(),
        }),
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Number(Decimal),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    EqEq,
    BangEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
}

fn lex(input: &str) -> Result<Vec<(Tok, usize)>, PredicateError> {
    let mut tokens = vec!();
    let chars: Vec<char> = input.chars().collect();
    let mut idx = 0;

    while idx < chars.len() {
        let ch = chars[idx];
        let start = idx;

        match ch {
            c if c.is_whitespace() => idx += 1,

            '(' => { tokens.push((Tok::LParen, start)); idx += 1 },
            ')' => { tokens.push((Tok::RParen, start)); idx += 1 },
            '[' => { tokens.push((Tok::LBracket, start)); idx += 1 },
            ']' => { tokens.push((Tok::RBracket, start)); idx += 1 },
            '.' => { tokens.push((Tok::Dot, start)); idx += 1 },
            ',' => { tokens.push((Tok::Comma, start)); idx += 1 },
            '+' => { tokens.push((Tok::Plus, start)); idx += 1 },
            '-' => { tokens.push((Tok::Minus, start)); idx += 1 },
            '*' => { tokens.push((Tok::Star, start)); idx += 1 },
            '/' => { tokens.push((Tok::Slash, start)); idx += 1 },

            '!' => {
                if chars.get(idx + 1) == Some(&'=') {
                    tokens.push((Tok::BangEq, start));
                    idx += 2;
                } else {
                    tokens.push((Tok::Bang, start));
                    idx += 1;
                }
            },

            '=' => {
                if chars.get(idx + 1) == Some(&'=') {
                    tokens.push((Tok::EqEq, start));
                    idx += 2;
                } else {
                    return Err(PredicateError::Syntax { position: start, message: "single '=' is not an operator, use '=='".into() });
                }
            },

            '<' => {
                if chars.get(idx + 1) == Some(&'=') {
                    tokens.push((Tok::Le, start));
                    idx += 2;
                } else {
                    tokens.push((Tok::Lt, start));
                    idx += 1;
                }
            },

            '>' => {
                if chars.get(idx + 1) == Some(&'=') {
                    tokens.push((Tok::Ge, start));
                    idx += 2;
                } else {
                    tokens.push((Tok::Gt, start));
                    idx += 1;
                }
            },

            '&' => {
                if chars.get(idx + 1) == Some(&'&') {
                    tokens.push((Tok::AndAnd, start));
                    idx += 2;
                } else {
                    return Err(PredicateError::Syntax { position: start, message: "single '&' is not an operator, use '&&'".into() });
                }
            },

            '|' => {
                if chars.get(idx + 1) == Some(&'|') {
                    tokens.push((Tok::OrOr, start));
                    idx += 2;
                } else {
                    return Err(PredicateError::Syntax { position: start, message: "single '|' is not an operator, use '||'".into() });
                }
            },

            '\'' => {
                idx += 1;
                let mut literal = String::new();
                loop {
                    match chars.get(idx) {
                        Some('\'') => { idx += 1; break },
                        Some(c) => { literal.push(*c); idx += 1 },
                        None => return Err(PredicateError::Syntax { position: start, message: "unterminated string literal".into() }),
                    }
                }
                tokens.push((Tok::Str(literal), start));
            },

            c if c.is_ascii_digit() => {
                let mut literal = String::new();
                while let Some(c) = chars.get(idx) {
                    if c.is_ascii_digit() || *c == '.' {
                        literal.push(*c);
                        idx += 1;
                    } else {
                        break
                    }
                }
                let number = literal.parse::<Decimal>()
                    .map_err(|_| PredicateError::Syntax { position: start, message: format!("invalid number '{}'", literal) })?;
                tokens.push((Tok::Number(number), start));
            },

            c if c.is_alphabetic() || c == '_' => {
                let mut literal = String::new();
                while let Some(c) = chars.get(idx) {
                    if c.is_alphanumeric() || *c == '_' {
                        literal.push(*c);
                        idx += 1;
                    } else {
                        break
                    }
                }
                tokens.push((Tok::Ident(literal), start));
            },

            other => return Err(PredicateError::Syntax { position: start, message: format!("unexpected character '{}'", other) }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Tok, usize)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(Tok, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: Tok, what: &str) -> Result<(), PredicateError> {
        match self.next() {
            Some((tok, _)) if tok == expected => Ok(()),
            Some((_, position)) => Err(PredicateError::Syntax { position, message: format!("expected {}", what) }),
            None => Err(PredicateError::Syntax { position: self.len, message: format!("expected {}", what) }),
        }
    }

    fn error_here(&self, message: &str) -> PredicateError {
        let position = self.peek().map(|(_, p)| *p).unwrap_or(self.len);
        PredicateError::Syntax { position, message: message.into() }
    }

    fn expr(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.and()?;
        while matches!(self.peek(), Some((Tok::OrOr, _))) {
            self.next();
            let rhs = self.and()?;
            lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.cmp()?;
        while matches!(self.peek(), Some((Tok::AndAnd, _))) {
            self.next();
            let rhs = self.cmp()?;
            lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.sum()?;

        let op = match self.peek() {
            Some((Tok::EqEq, _))   => Some(BinaryOp::Eq),
            Some((Tok::BangEq, _)) => Some(BinaryOp::Ne),
            Some((Tok::Lt, _))     => Some(BinaryOp::Lt),
            Some((Tok::Le, _))     => Some(BinaryOp::Le),
            Some((Tok::Gt, _))     => Some(BinaryOp::Gt),
            Some((Tok::Ge, _))     => Some(BinaryOp::Ge),
            Some((Tok::Ident(word), _)) if word == "contains" => Some(BinaryOp::Contains),
            Some((Tok::Ident(word), _)) if word == "matches"  => Some(BinaryOp::Matches),
            _ => None,
        };

        match op {
            Some(op) => {
                self.next();
                let rhs = self.sum()?;
                Ok(Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
            },
            None => Ok(lhs),
        }
    }

    fn sum(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some((Tok::Plus, _))  => BinaryOp::Add,
                Some((Tok::Minus, _)) => BinaryOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some((Tok::Star, _))  => BinaryOp::Mul,
                Some((Tok::Slash, _)) => BinaryOp::Div,
                _ => break,
            };
            self.next();
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, PredicateError> {
        match self.peek() {
            Some((Tok::Bang, _)) => {
                self.next();
                Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.unary()?) })
            },
            Some((Tok::Minus, _)) => {
                self.next();
                Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.unary()?) })
            },
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, PredicateError> {
        match self.next() {
            Some((Tok::Number(number), _)) => Ok(Expr::Number(number)),
            Some((Tok::Str(literal), _)) => Ok(Expr::Text(literal)),

            Some((Tok::LParen, _)) => {
                let inner = self.expr()?;
                self.eat(Tok::RParen, "')'")?;
                Ok(inner)
            },

            Some((Tok::Ident(word), position)) => self.ident(word, position),

            Some((_, position)) => Err(PredicateError::Syntax { position, message: "expected a value".into() }),
            None => Err(PredicateError::Syntax { position: self.len, message: "expected a value".into() }),
        }
    }

    fn ident(&mut self, word: String, position: usize) -> Result<Expr, PredicateError> {
        match word.as_str() {
            "true"  => return Ok(Expr::Bool(true)),
            "false" => return Ok(Expr::Bool(false)),
            "null"  => return Ok(Expr::Null),
            _ => {},
        }

        let func = match word.as_str() {
            "abs"  => Some(Func::Abs),
            "num"  => Some(Func::Num),
            "date" => Some(Func::Date),
            _ => None,
        };

        if let Some(func) = func {
            self.eat(Tok::LParen, &format!("'(' after {}", func.name()))?;
            let mut args = vec!(self.expr()?);
            while matches!(self.peek(), Some((Tok::Comma, _))) {
                self.next();
                args.push(self.expr()?);
            }
            self.eat(Tok::RParen, "')'")?;

            if args.len() != func.arity() {
                return Err(PredicateError::Syntax {
                    position,
                    message: format!("{} takes {} argument(s), found {}", func.name(), func.arity(), args.len()),
                });
            }

            return Ok(Expr::Call { func, args })
        }

        // Anything else must be a side-qualified value reference.
        match self.next() {
            Some((Tok::Dot, _)) => {
                match self.next() {
                    Some((Tok::Ident(field), _)) => Ok(Expr::Reference { side: word, field }),
                    Some((_, position)) => Err(PredicateError::Syntax { position, message: "expected a role name after '.'".into() }),
                    None => Err(PredicateError::Syntax { position: self.len, message: "expected a role name after '.'".into() }),
                }
            },
            Some((Tok::LBracket, _)) => {
                let field = match self.next() {
                    Some((Tok::Str(field), _)) => field,
                    Some((_, position)) => return Err(PredicateError::Syntax { position, message: "expected a quoted header name".into() }),
                    None => return Err(PredicateError::Syntax { position: self.len, message: "expected a quoted header name".into() }),
                };
                self.eat(Tok::RBracket, "']'")?;
                Ok(Expr::Reference { side: word, field })
            },
            _ => Err(self.error_here(&format!("expected '.' or '[' after '{}'", word))),
        }
    }
}
