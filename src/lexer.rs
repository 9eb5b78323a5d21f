use super::error::{Error, Result};
use super::token::Token;
use combine::error::ParseError;
use combine::parser::char::{alpha_num, digit, spaces};
use combine::parser::choice::choice;
use combine::parser::Parser;
use combine::stream::Stream;
use combine::{any, attempt, eof, many1, satisfy, skip_many, token};

/// strtod semantics for a digit/dot run: the value is the longest valid
/// float prefix, so "1.2.3" is 1.2 and a run with no valid prefix is 0.0.
fn parse_longest_prefix(run: &str) -> f64 {
    let mut end = run.len();
    while end > 0 {
        if let Ok(value) = run[..end].parse() {
            return value;
        }
        end -= 1;
    }
    0.0
}

fn number<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    spaces()
        .with(many1(choice((digit(), token('.')))))
        .map(|ns: String| Token::Number(parse_longest_prefix(&ns)))
}

fn ident<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    spaces()
        .with(many1(alpha_num()))
        .map(|s: String| match s.as_ref() {
            "def" => Token::Def,
            "extern" => Token::Extern,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "binary" => Token::Binary,
            "unary" => Token::Unary,
            "var" => Token::Var,
            id => Token::Ident(id.to_string()),
        })
}

fn comment<Input>() -> impl Parser<Input, Output = ()>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    spaces()
        .with(token('#'))
        .with(skip_many(satisfy(|c| c != '\n')))
}

fn kwd<Input>() -> impl Parser<Input, Output = Token>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    spaces().with(any()).map(Token::Kwd)
}

/// One token per call; `None` at end of input, repeatably.
pub(crate) fn lex<Input>() -> impl Parser<Input, Output = Option<Token>>
where
    Input: Stream<Token = char>,
    Input::Error: ParseError<Input::Token, Input::Range, Input::Position>,
{
    skip_many(attempt(comment())).with(choice((
        attempt(spaces().with(eof()).map(|_| None)),
        attempt(number().map(Some)),
        attempt(ident().map(Some)),
        kwd().map(Some),
    )))
}

pub(crate) fn tokenize(mut input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    loop {
        match lex().parse(input) {
            Ok((Some(token), rest)) => {
                input = rest;
                tokens.push(token);
            }
            Ok((None, _)) => return Ok(tokens),
            Err(e) => return Err(Error::Lex(format!("{}", e))),
        }
    }
}
