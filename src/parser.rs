use super::ast::{Expr, Function, ProtoKind, Prototype};
use super::error::{Error, Result};
use super::ops::BinopPrecedence;
use super::token::Token;

const EOF_TOKEN: Token = Token::Eof;

/// Recursive-descent parser with one token of lookahead. Binary expressions
/// are parsed by precedence climbing against the operator table, so
/// operators installed by earlier definitions take effect immediately.
pub(crate) struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ops: &'a BinopPrecedence,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(tokens: &'a [Token], ops: &'a BinopPrecedence) -> Parser<'a> {
        Parser {
            tokens,
            pos: 0,
            ops,
        }
    }

    pub(crate) fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&EOF_TOKEN)
    }

    pub(crate) fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }

    /// Number of tokens consumed so far. After a failed parse this is where
    /// the parse stopped; the driver skips one more token to resynchronize.
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// definition ::= 'def' prototype expression
    pub(crate) fn parse_definition(&mut self) -> Result<Function> {
        self.advance(); // eat 'def'
        let proto = self.parse_prototype()?;
        let body = self.parse_expression()?;
        Ok(Function(proto, body))
    }

    /// external ::= 'extern' prototype
    pub(crate) fn parse_extern(&mut self) -> Result<Prototype> {
        self.advance(); // eat 'extern'
        self.parse_prototype()
    }

    /// toplevelexpr ::= expression, wrapped in an anonymous nullary prototype.
    pub(crate) fn parse_top_level(&mut self) -> Result<Function> {
        let body = self.parse_expression()?;
        let proto = Prototype {
            name: String::new(),
            args: Vec::new(),
            kind: ProtoKind::Function,
            precedence: 0,
        };
        Ok(Function(proto, body))
    }

    /// prototype ::= ident '(' ident* ')'
    ///             | 'unary' CHAR '(' ident ')'
    ///             | 'binary' CHAR number? '(' ident ident ')'
    fn parse_prototype(&mut self) -> Result<Prototype> {
        let (name, kind, precedence) = match self.current().clone() {
            Token::Ident(id) => {
                self.advance();
                (id, ProtoKind::Function, 0)
            }
            Token::Unary => {
                self.advance();
                let op = match self.current() {
                    Token::Kwd(c) => *c,
                    _ => return Err(Error::Parse("Expected unary operator".to_owned())),
                };
                self.advance();
                (format!("unary{}", op), ProtoKind::UnaryOp, 0)
            }
            Token::Binary => {
                self.advance();
                let op = match self.current() {
                    Token::Kwd(c) => *c,
                    _ => return Err(Error::Parse("Expected binary operator".to_owned())),
                };
                self.advance();

                // Optional precedence, defaulting to 30.
                let precedence = match self.current() {
                    Token::Number(n) => Some(*n),
                    _ => None,
                };
                let precedence = match precedence {
                    Some(n) => {
                        if n < 1.0 || n > 100.0 {
                            return Err(Error::Parse(
                                "Invalid precedence: must be 1..100".to_owned(),
                            ));
                        }
                        self.advance();
                        n as i32
                    }
                    None => 30,
                };
                (format!("binary{}", op), ProtoKind::BinaryOp, precedence)
            }
            _ => return Err(Error::Parse("Expected function name in prototype".to_owned())),
        };

        self.expect_kwd('(', "Expected '(' in prototype")?;
        let mut args = Vec::new();
        while let Token::Ident(id) = self.current().clone() {
            self.advance();
            args.push(id);
        }
        self.expect_kwd(')', "Expected ')' in prototype")?;

        let arity = match kind {
            ProtoKind::Function => args.len(),
            ProtoKind::UnaryOp => 1,
            ProtoKind::BinaryOp => 2,
        };
        if args.len() != arity {
            return Err(Error::Parse("Invalid number of args for operator".to_owned()));
        }

        Ok(Prototype {
            name,
            args,
            kind,
            precedence,
        })
    }

    /// expression ::= unary binoprhs
    fn parse_expression(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        self.parse_binop_rhs(0, lhs)
    }

    /// binoprhs ::= (binop unary)*
    ///
    /// `expr_prec` is the minimal operator precedence this call may consume.
    fn parse_binop_rhs(&mut self, expr_prec: i32, mut lhs: Expr) -> Result<Expr> {
        loop {
            let op = match self.current() {
                Token::Kwd(c) if self.ops.precedence(*c) >= expr_prec => *c,
                _ => return Ok(lhs),
            };
            let tok_prec = self.ops.precedence(op);
            self.advance();

            let mut rhs = self.parse_unary()?;

            // If the next operator binds tighter, let it take rhs first;
            // equal precedences associate to the left.
            let next_prec = match self.current() {
                Token::Kwd(c) => self.ops.precedence(*c),
                _ => -1,
            };
            if tok_prec < next_prec {
                rhs = self.parse_binop_rhs(tok_prec + 1, rhs)?;
            }

            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// unary ::= primary | CHAR unary
    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.current() {
            Token::Kwd(c) if *c != '(' && *c != ',' => Some(*c),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary(op, Box::new(operand)))
            }
            None => self.parse_primary(),
        }
    }

    /// primary ::= number | identifierexpr | parenexpr | ifexpr | forexpr | varexpr
    fn parse_primary(&mut self) -> Result<Expr> {
        match self.current().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Ident(id) => {
                self.advance();
                self.parse_identifier_rest(id)
            }
            Token::Kwd('(') => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect_kwd(')', "expected ')'")?;
                Ok(inner)
            }
            Token::If => self.parse_if(),
            Token::For => self.parse_for(),
            Token::Var => self.parse_var(),
            _ => Err(Error::Parse(
                "unknown token when expecting an expression".to_owned(),
            )),
        }
    }

    /// identifierexpr ::= ident | ident '(' (expression (',' expression)*)? ')'
    ///
    /// The identifier itself has already been consumed.
    fn parse_identifier_rest(&mut self, name: String) -> Result<Expr> {
        if *self.current() != Token::Kwd('(') {
            return Ok(Expr::Variable(name));
        }
        self.advance(); // eat '('

        let mut args = Vec::new();
        if *self.current() != Token::Kwd(')') {
            loop {
                args.push(self.parse_expression()?);
                if *self.current() == Token::Kwd(')') {
                    break;
                }
                if *self.current() != Token::Kwd(',') {
                    return Err(Error::Parse(
                        "Expected ')' or ',' in argument list".to_owned(),
                    ));
                }
                self.advance();
            }
        }
        self.advance(); // eat ')'

        Ok(Expr::Call(name, args))
    }

    /// ifexpr ::= 'if' expression 'then' expression 'else' expression
    fn parse_if(&mut self) -> Result<Expr> {
        self.advance(); // eat 'if'
        let cond = self.parse_expression()?;

        if *self.current() != Token::Then {
            return Err(Error::Parse("expected then".to_owned()));
        }
        self.advance();
        let then_expr = self.parse_expression()?;

        if *self.current() != Token::Else {
            return Err(Error::Parse("Expected else".to_owned()));
        }
        self.advance();
        let else_expr = self.parse_expression()?;

        Ok(Expr::If(
            Box::new(cond),
            Box::new(then_expr),
            Box::new(else_expr),
        ))
    }

    /// forexpr ::= 'for' ident '=' expression ',' expression (',' expression)?
    ///             'in' expression
    fn parse_for(&mut self) -> Result<Expr> {
        self.advance(); // eat 'for'

        let name = match self.current().clone() {
            Token::Ident(id) => {
                self.advance();
                id
            }
            _ => return Err(Error::Parse("Expected identifier after 'for'".to_owned())),
        };

        self.expect_kwd('=', "Expected '=' in for loop")?;
        let start = self.parse_expression()?;
        self.expect_kwd(',', "Expected ',' after start value in for loop")?;
        let end = self.parse_expression()?;

        let step = if *self.current() == Token::Kwd(',') {
            self.advance();
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };

        if *self.current() != Token::In {
            return Err(Error::Parse("Expected 'in' in for loop".to_owned()));
        }
        self.advance();
        let body = self.parse_expression()?;

        Ok(Expr::For(
            name,
            Box::new(start),
            Box::new(end),
            step,
            Box::new(body),
        ))
    }

    /// varexpr ::= 'var' ident ('=' expression)?
    ///             (',' ident ('=' expression)?)* 'in' expression
    fn parse_var(&mut self) -> Result<Expr> {
        self.advance(); // eat 'var'

        if !matches!(self.current(), Token::Ident(_)) {
            return Err(Error::Parse("expected identifier after var".to_owned()));
        }

        let mut bindings = Vec::new();
        loop {
            let name = match self.current().clone() {
                Token::Ident(id) => {
                    self.advance();
                    id
                }
                _ => {
                    return Err(Error::Parse(
                        "expected identifier list after comma".to_owned(),
                    ))
                }
            };

            let init = if *self.current() == Token::Kwd('=') {
                self.advance();
                Some(self.parse_expression()?)
            } else {
                None
            };
            bindings.push((name, init));

            if *self.current() != Token::Kwd(',') {
                break;
            }
            self.advance();
        }

        if *self.current() != Token::In {
            return Err(Error::Parse("expected 'in' keyword after 'var'".to_owned()));
        }
        self.advance();
        let body = self.parse_expression()?;

        Ok(Expr::Var(bindings, Box::new(body)))
    }

    fn expect_kwd(&mut self, c: char, msg: &str) -> Result<()> {
        if *self.current() == Token::Kwd(c) {
            self.advance();
            Ok(())
        } else {
            Err(Error::Parse(msg.to_owned()))
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_expr(src: &str) -> Result<Expr> {
        let ops = BinopPrecedence::default();
        let tokens = tokenize(src).unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        parser.parse_expression()
    }

    fn parse_proto(src: &str) -> Result<Prototype> {
        let ops = BinopPrecedence::default();
        let tokens = tokenize(src).unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        parser.parse_prototype()
    }

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.to_owned()))
    }

    #[test]
    fn test_primary() {
        assert_eq!(parse_expr("1.0"), Ok(Expr::Number(1.0)));
        assert_eq!(parse_expr("y"), Ok(Expr::Variable("y".to_owned())));
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            parse_expr("1 + 2 * 3"),
            Ok(Expr::Binary(
                '+',
                num(1.0),
                Box::new(Expr::Binary('*', num(2.0), num(3.0)))
            ))
        );

        assert_eq!(
            parse_expr("(1 + 2) * 3"),
            Ok(Expr::Binary(
                '*',
                Box::new(Expr::Binary('+', num(1.0), num(2.0))),
                num(3.0)
            ))
        );

        assert_eq!(
            parse_expr("a < b + c"),
            Ok(Expr::Binary(
                '<',
                var("a"),
                Box::new(Expr::Binary('+', var("b"), var("c")))
            ))
        );
    }

    #[test]
    fn test_left_associativity() {
        assert_eq!(
            parse_expr("1 - 2 - 3"),
            Ok(Expr::Binary(
                '-',
                Box::new(Expr::Binary('-', num(1.0), num(2.0))),
                num(3.0)
            ))
        );
    }

    #[test]
    fn test_assignment_parses_as_binop() {
        assert_eq!(
            parse_expr("x = y + 1"),
            Ok(Expr::Binary(
                '=',
                var("x"),
                Box::new(Expr::Binary('+', var("y"), num(1.0)))
            ))
        );
    }

    #[test]
    fn test_installed_operator_precedence() {
        let mut ops = BinopPrecedence::default();
        ops.install('|', 5);
        let tokens = tokenize("a | b < c").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        assert_eq!(
            parser.parse_expression(),
            Ok(Expr::Binary(
                '|',
                var("a"),
                Box::new(Expr::Binary('<', var("b"), var("c")))
            ))
        );
    }

    #[test]
    fn test_uninstalled_operator_is_not_binop() {
        // Before 'def binary|', "a | b" is 'a' followed by a separate form.
        let ops = BinopPrecedence::default();
        let tokens = tokenize("a | b").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        assert_eq!(parser.parse_expression(), Ok(Expr::Variable("a".to_owned())));
        assert_eq!(parser.position(), 1);
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            parse_expr("!x"),
            Ok(Expr::Unary('!', var("x")))
        );
        assert_eq!(
            parse_expr("--x"),
            Ok(Expr::Unary('-', Box::new(Expr::Unary('-', var("x")))))
        );
        assert_eq!(
            parse_expr("a - -b"),
            Ok(Expr::Binary('-', var("a"), Box::new(Expr::Unary('-', var("b")))))
        );
    }

    #[test]
    fn test_call() {
        assert_eq!(
            parse_expr("foo(y, 4.0)"),
            Ok(Expr::Call(
                "foo".to_owned(),
                vec![Expr::Variable("y".to_owned()), Expr::Number(4.0)]
            ))
        );
        assert_eq!(parse_expr("foo()"), Ok(Expr::Call("foo".to_owned(), vec![])));
        assert_eq!(
            parse_expr("foo(1 2)"),
            Err(Error::Parse("Expected ')' or ',' in argument list".to_owned()))
        );
    }

    #[test]
    fn test_if() {
        assert_eq!(
            parse_expr("if x < 2 then x else y"),
            Ok(Expr::If(
                Box::new(Expr::Binary('<', var("x"), num(2.0))),
                var("x"),
                var("y")
            ))
        );
        assert_eq!(
            parse_expr("if x then y"),
            Err(Error::Parse("Expected else".to_owned()))
        );
    }

    #[test]
    fn test_for() {
        assert_eq!(
            parse_expr("for i=1, 3 in 3"),
            Ok(Expr::For("i".to_owned(), num(1.0), num(3.0), None, num(3.0)))
        );

        assert_eq!(
            parse_expr("for i=1, 3,2 in 3"),
            Ok(Expr::For(
                "i".to_owned(),
                num(1.0),
                num(3.0),
                Some(num(2.0)),
                num(3.0)
            ))
        );
    }

    #[test]
    fn test_var() {
        assert_eq!(
            parse_expr("var a = 1, b in a"),
            Ok(Expr::Var(
                vec![
                    ("a".to_owned(), Some(Expr::Number(1.0))),
                    ("b".to_owned(), None),
                ],
                var("a")
            ))
        );

        assert_eq!(
            parse_expr("var a = 1 a"),
            Err(Error::Parse("expected 'in' keyword after 'var'".to_owned()))
        );
        assert_eq!(
            parse_expr("var in x"),
            Err(Error::Parse("expected identifier after var".to_owned()))
        );
    }

    #[test]
    fn test_prototype() {
        assert_eq!(
            parse_proto("f()"),
            Ok(Prototype {
                name: "f".to_owned(),
                args: vec![],
                kind: ProtoKind::Function,
                precedence: 0,
            })
        );

        assert_eq!(
            parse_proto("foo(a b)"),
            Ok(Prototype {
                name: "foo".to_owned(),
                args: vec!["a".to_owned(), "b".to_owned()],
                kind: ProtoKind::Function,
                precedence: 0,
            })
        );
    }

    #[test]
    fn test_operator_prototype() {
        assert_eq!(
            parse_proto("binary : 1 (x y)"),
            Ok(Prototype {
                name: "binary:".to_owned(),
                args: vec!["x".to_owned(), "y".to_owned()],
                kind: ProtoKind::BinaryOp,
                precedence: 1,
            })
        );

        // Precedence defaults to 30 when omitted.
        assert_eq!(
            parse_proto("binary| (x y)").map(|p| p.precedence),
            Ok(30)
        );

        assert_eq!(
            parse_proto("unary !(v)"),
            Ok(Prototype {
                name: "unary!".to_owned(),
                args: vec!["v".to_owned()],
                kind: ProtoKind::UnaryOp,
                precedence: 0,
            })
        );

        assert_eq!(
            parse_proto("binary % 101 (x y)"),
            Err(Error::Parse("Invalid precedence: must be 1..100".to_owned()))
        );
        assert_eq!(
            parse_proto("binary % 3 (x)"),
            Err(Error::Parse("Invalid number of args for operator".to_owned()))
        );
        assert_eq!(
            parse_proto("unary $ (a b)"),
            Err(Error::Parse("Invalid number of args for operator".to_owned()))
        );
    }

    #[test]
    fn test_operator_char() {
        assert_eq!(parse_proto("binary : 1 (x y)").unwrap().operator_char(), Some(':'));
        assert_eq!(parse_proto("f(a)").unwrap().operator_char(), None);
    }

    #[test]
    fn test_definition_consumes_exactly_one_form() {
        let ops = BinopPrecedence::default();
        let tokens = tokenize("def foo(a) a 42").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        let def = parser.parse_definition().unwrap();
        assert_eq!(def.0.name, "foo");
        assert_eq!(*parser.current(), Token::Number(42.0));
        assert_eq!(parser.position(), tokens.len() - 1);
    }

    #[test]
    fn test_top_level_is_anonymous() {
        let ops = BinopPrecedence::default();
        let tokens = tokenize("4 + 5").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        let Function(proto, body) = parser.parse_top_level().unwrap();
        assert_eq!(proto.name, "");
        assert!(proto.args.is_empty());
        assert_eq!(body, Expr::Binary('+', Expr::Number(4.0).into(), Expr::Number(5.0).into()));
        assert!(parser.at_end());
    }

    #[test]
    fn test_parse_error() {
        let ops = BinopPrecedence::default();
        let tokens = tokenize("def foo(").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        assert!(parser.parse_definition().is_err());
        assert!(parser.position() <= tokens.len());
    }

    #[test]
    fn test_eof_lookahead_is_sticky() {
        let ops = BinopPrecedence::default();
        let tokens = tokenize("x").unwrap();
        let mut parser = Parser::new(&tokens, &ops);
        parser.parse_expression().unwrap();
        assert_eq!(*parser.current(), Token::Eof);
        parser.advance();
        assert_eq!(*parser.current(), Token::Eof);
    }
}
