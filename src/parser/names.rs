// Parsers for the short names used in declarative options

use super::lexer::{integer, word, ws};
use nom::{
    bytes::complete::take_while_m_n,
    character::complete::{char, one_of},
    combinator::{eof, map_res, opt},
    IResult,
};

/// Parse a percentile reducer name such as `p90` into the quantile `0.9`.
pub fn parse_percentile(input: &str) -> IResult<&str, f64> {
    let (input, _) = one_of("pP")(input)?;
    let (input, nn) = map_res(take_while_m_n(2, 2, |c: char| c.is_ascii_digit()), |d: &str| {
        d.parse::<u32>()
    })(input)?;
    let (input, _) = eof(input)?;
    Ok((input, f64::from(nn) / 100.0))
}

/// Parse an optional leading `-` (descending order) off a name.
pub fn parse_negated(input: &str) -> IResult<&str, bool> {
    let (input, minus) = opt(char('-'))(input)?;
    Ok((input, minus.is_some()))
}

/// Parse an interval name such as `day`, `3 months` or `2weeks` into its
/// step count and unit word.
pub fn parse_interval_name(input: &str) -> IResult<&str, (u32, &str)> {
    let (input, count) = opt(ws(integer))(input)?;
    let (input, unit) = ws(word)(input)?;
    let (input, _) = eof(input)?;
    Ok((input, (count.unwrap_or(1), unit)))
}

/// The quantile a `pNN` name stands for, if it is one.
pub fn percentile(name: &str) -> Option<f64> {
    parse_percentile(name).ok().map(|(_, p)| p)
}

/// Split a `-` prefix off a name, returning whether it was present.
pub fn negated(name: &str) -> (bool, &str) {
    match parse_negated(name) {
        Ok((rest, negated)) => (negated, rest),
        Err(_) => (false, name),
    }
}

pub fn interval_name(name: &str) -> Option<(u32, &str)> {
    parse_interval_name(name).ok().map(|(_, parsed)| parsed)
}
