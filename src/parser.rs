use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use serde_json::Value;

use crate::codec::Payload;

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Add { payload: Payload, hint: Option<String>, prev: Option<String> },
    Get { reference: String },
    Chain { reference: String },
    List { type_tag: Option<String>, sort_by: Option<String>, descending: bool },
    Types,
    Stats,
    Similar { text: String, threshold: Option<f64>, limit: Option<usize> },
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_float(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, opt(tuple((char('.'), digit1)))))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn parse_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, |s: &str| s.parse::<usize>())(input)
}

fn parse_vector(input: &str) -> IResult<&str, Vec<f64>> {
    delimited(
        char('['),
        separated_list0(char(','), ws(parse_float)),
        preceded(multispace0, char(']')),
    )(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_json(input: &str) -> IResult<&str, Value> {
    map_res(
        delimited(char('\''), take_until("'"), char('\'')),
        |s: &str| serde_json::from_str::<Value>(s),
    )(input)
}

/// `sha3:...`, optionally wrapped in single quotes.
fn parse_ref(input: &str) -> IResult<&str, String> {
    let (input, _) = opt(char('\''))(input)?;
    let (input, reference) = take_while1(|c: char| c.is_ascii_alphanumeric() || c == ':')(input)?;
    let (input, _) = opt(char('\''))(input)?;
    Ok((input, reference.to_string()))
}

fn parse_ident(input: &str) -> IResult<&str, String> {
    map(take_while1(|c: char| c.is_alphanumeric() || c == '_'), str::to_string)(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- COMMAND PARSERS ---

fn parse_payload(input: &str) -> IResult<&str, Payload> {
    alt((
        map(preceded(ws(tag_ci("JSON")), parse_json), Payload::from),
        map(parse_vector, Payload::Vector),
        map(parse_quoted_string, Payload::Text),
        map(parse_float, Payload::Number),
    ))(input)
}

fn parse_add(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ADD")(input)?;
    let (input, payload) = ws(parse_payload)(input)?;
    let (input, hint) = opt(preceded(ws(tag_ci("HINT")), parse_quoted_string))(input)?;
    let (input, prev) = opt(preceded(ws(tag_ci("PREV")), parse_ref))(input)?;
    Ok((input, Command::Add { payload, hint, prev }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, reference) = parse_ref(input)?;
    Ok((input, Command::Get { reference }))
}

fn parse_chain(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("CHAIN")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, reference) = parse_ref(input)?;
    Ok((input, Command::Chain { reference }))
}

fn parse_list(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("LIST")(input)?;
    let (input, type_tag) = opt(preceded(ws(tag_ci("TYPE")), parse_ident))(input)?;
    let (input, sort_by) = opt(preceded(tuple((ws(tag_ci("SORT")), ws(tag_ci("BY")))), parse_ident))(input)?;
    let (input, direction) = opt(ws(alt((value(false, tag_ci("ASC")), value(true, tag_ci("DESC"))))))(input)?;
    Ok((input, Command::List { type_tag, sort_by, descending: direction.unwrap_or(true) }))
}

fn parse_types(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("TYPES")(input)?;
    Ok((input, Command::Types))
}

fn parse_stats(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("STATS")(input)?;
    Ok((input, Command::Stats))
}

fn parse_similar(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SIMILAR"), tag_ci("FIND")))(input)?;
    let (input, text) = ws(parse_quoted_string)(input)?;
    let (input, threshold) = opt(preceded(ws(tag_ci("THRESHOLD")), parse_float))(input)?;
    let (input, limit) = opt(preceded(ws(tag_ci("LIMIT")), parse_usize))(input)?;
    Ok((input, Command::Similar { text, threshold, limit }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_add,
        parse_get,
        parse_chain,
        parse_list,
        parse_types,
        parse_stats,
        parse_similar,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder.trim()));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context: String = e.input.chars().take(20).collect();
            let context = if e.input.chars().count() > 20 { format!("{}...", context) } else { context };
            Err(format!("Invalid syntax near: '{}'", context))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
