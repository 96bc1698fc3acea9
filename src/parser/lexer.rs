// Lexical helpers shared by the option-name parsers

use nom::{
    character::complete::{alpha1, digit1, multispace0},
    combinator::map_res,
    error::ParseError,
    sequence::delimited,
    IResult,
};

/// Wrap a parser so it tolerates surrounding whitespace.
pub fn ws<'a, F, O, E>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
    E: ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

/// Unsigned decimal integer.
pub fn integer(input: &str) -> IResult<&str, u32> {
    map_res(digit1, str::parse)(input)
}

/// An alphabetic word, e.g. a calendar unit.
pub fn word(input: &str) -> IResult<&str, &str> {
    alpha1(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_integer() {
        let (rest, n) = ws(integer)("  42 days").unwrap();
        assert_eq!(n, 42);
        assert_eq!(rest, "days");
    }

    #[test]
    fn test_word() {
        assert_eq!(word("month1"), Ok(("1", "month")));
        assert!(word("1month").is_err());
    }
}
