use glam::Vec3;
use nom::bytes::complete::{take, take_until};
use nom::number::complete::be_u8;
use serde::Serialize;
use variantly::Variantly;

use crate::scene_graph::COORD_TFN;
use crate::types::AgentRef;
use crate::{Error, ErrorKind, IResult, Result, failure_from_kind};

use super::shapes::{Color, DrawnShape, Expiration, Shape};

const OPTION: u8 = 0;
const SHAPE: u8 = 1;
const ANNOTATION: u8 = 2;
const CONTROL: u8 = 3;

const PERSISTENT_BIT: u8 = 0x80;

/// Text shown above an agent until it is cleared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAnnotation {
    pub text: String,
    pub color: Color,
}

/// One decoded drawing command.
#[derive(Debug, Clone, PartialEq, Serialize, Variantly)]
pub enum DrawCommand {
    /// Swap the buffers of every set whose name starts with the prefix.
    Swap(String),
    /// Empty every set whose name starts with the prefix.
    Clear(String),
    /// Add a shape to the back buffer of the named set.
    Shape(String, DrawnShape),
    AgentAnnotation(AgentRef, AgentAnnotation),
    ClearAgentAnnotation(AgentRef),
    SelectAgent(AgentRef),
}

/// Maps nom's running-out-of-input errors onto the draw error kind.
fn draw_error(e: nom::Err<Error>) -> Error {
    let err = Error::from(e);
    match err.kind {
        ErrorKind::Nom(kind) => {
            ErrorKind::MalformedDrawCommand(format!("truncated command ({kind:?})")).into()
        }
        _ => err,
    }
}

fn malformed(msg: String) -> nom::Err<Error> {
    failure_from_kind(ErrorKind::MalformedDrawCommand(msg))
}

/// A float written as exactly six ASCII characters, e.g. `-1.500`.
fn float(i: &[u8]) -> IResult<'_, f32> {
    let (i, raw) = take(6usize)(i)?;
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    match text.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok((i, v)),
        _ => Err(malformed(format!("bad float {text:?}"))),
    }
}

fn string(i: &[u8]) -> IResult<'_, String> {
    let (i, raw) = take_until(&b"\0"[..])(i)?;
    let (i, _) = take(1usize)(i)?;
    Ok((i, String::from_utf8_lossy(raw).into_owned()))
}

fn rgb(i: &[u8]) -> IResult<'_, Color> {
    let (i, r) = be_u8(i)?;
    let (i, g) = be_u8(i)?;
    let (i, b) = be_u8(i)?;
    Ok((i, Color::rgb(r, g, b)))
}

fn rgba(i: &[u8]) -> IResult<'_, Color> {
    let (i, color) = rgb(i)?;
    let (i, a) = be_u8(i)?;
    Ok((i, Color { a, ..color }))
}

/// A point on the field given by x and y, in viewer coordinates.
fn coords2(i: &[u8]) -> IResult<'_, Vec3> {
    let (i, x) = float(i)?;
    let (i, y) = float(i)?;
    Ok((i, COORD_TFN.transform_point3(Vec3::new(x, y, 0.0))))
}

fn coords3(i: &[u8]) -> IResult<'_, Vec3> {
    let (i, x) = float(i)?;
    let (i, y) = float(i)?;
    let (i, z) = float(i)?;
    Ok((i, COORD_TFN.transform_point3(Vec3::new(x, y, z))))
}

fn agent(i: &[u8]) -> IResult<'_, AgentRef> {
    let (i, b) = be_u8(i)?;
    Ok((i, AgentRef::from_byte(b)))
}

fn parse_option(i: &[u8], subtype: u8) -> IResult<'_, DrawCommand> {
    let (i, prefix) = string(i)?;
    match subtype {
        0 => Ok((i, DrawCommand::Swap(prefix))),
        1 => Ok((i, DrawCommand::Clear(prefix))),
        other => Err(malformed(format!("unknown draw option {other}"))),
    }
}

fn parse_shape(i: &[u8], subtype: u8) -> IResult<'_, DrawCommand> {
    let expiration = if subtype & PERSISTENT_BIT != 0 {
        Expiration::Persistent
    } else {
        Expiration::Cycle
    };

    let (i, shape) = match subtype & !PERSISTENT_BIT {
        0 => {
            let (i, center) = coords2(i)?;
            let (i, radius) = float(i)?;
            let (i, thickness) = float(i)?;
            let (i, color) = rgb(i)?;
            (
                i,
                Shape::Circle {
                    center,
                    radius,
                    thickness,
                    color,
                },
            )
        }
        1 => {
            let (i, start) = coords3(i)?;
            let (i, end) = coords3(i)?;
            let (i, thickness) = float(i)?;
            let (i, color) = rgb(i)?;
            (
                i,
                Shape::Line {
                    start,
                    end,
                    thickness,
                    color,
                },
            )
        }
        2 => {
            let (i, position) = coords3(i)?;
            let (i, size) = float(i)?;
            let (i, color) = rgb(i)?;
            (
                i,
                Shape::Point {
                    position,
                    size,
                    color,
                },
            )
        }
        3 => {
            let (i, center) = coords3(i)?;
            let (i, radius) = float(i)?;
            let (i, color) = rgb(i)?;
            (
                i,
                Shape::Sphere {
                    center,
                    radius,
                    color,
                },
            )
        }
        4 => {
            let (i, count) = be_u8(i)?;
            let (mut i, color) = rgba(i)?;
            let mut vertices = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let (rest, v) = coords3(i)?;
                vertices.push(v);
                i = rest;
            }
            (i, Shape::Polygon { vertices, color })
        }
        other => return Err(malformed(format!("unknown shape {other}"))),
    };

    let (i, set) = string(i)?;
    Ok((i, DrawCommand::Shape(set, DrawnShape { shape, expiration })))
}

fn parse_annotation(i: &[u8], subtype: u8) -> IResult<'_, DrawCommand> {
    match subtype {
        0 => {
            let (i, position) = coords3(i)?;
            let (i, color) = rgb(i)?;
            let (i, text) = string(i)?;
            let (i, set) = string(i)?;
            let shape = DrawnShape {
                shape: Shape::Annotation {
                    position,
                    text,
                    color,
                },
                expiration: Expiration::Cycle,
            };
            Ok((i, DrawCommand::Shape(set, shape)))
        }
        1 => {
            let (i, agent) = agent(i)?;
            let (i, color) = rgb(i)?;
            let (i, text) = string(i)?;
            Ok((
                i,
                DrawCommand::AgentAnnotation(agent, AgentAnnotation { text, color }),
            ))
        }
        2 => {
            let (i, agent) = agent(i)?;
            Ok((i, DrawCommand::ClearAgentAnnotation(agent)))
        }
        other => Err(malformed(format!("unknown annotation {other}"))),
    }
}

fn parse_control(i: &[u8], subtype: u8) -> IResult<'_, DrawCommand> {
    match subtype {
        0 => {
            let (i, agent) = agent(i)?;
            Ok((i, DrawCommand::SelectAgent(agent)))
        }
        other => Err(malformed(format!("unknown control {other}"))),
    }
}

/// Parses one command from the front of `i`.
pub fn parse_command(i: &[u8]) -> IResult<'_, DrawCommand> {
    let (i, kind) = be_u8(i)?;
    let (i, subtype) = be_u8(i)?;
    match kind {
        OPTION => parse_option(i, subtype),
        SHAPE => parse_shape(i, subtype),
        ANNOTATION => parse_annotation(i, subtype),
        CONTROL => parse_control(i, subtype),
        other => Err(malformed(format!("unknown command type {other}"))),
    }
}

/// Commands of one datagram in order. Iteration stops after the first error,
/// since the length of a bad command and so the start of the next one is
/// unknown.
pub struct Commands<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Commands<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Commands {
            rest: data,
            failed: false,
        }
    }
}

impl Iterator for Commands<'_> {
    type Item = Result<DrawCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match parse_command(self.rest) {
            Ok((rest, command)) => {
                self.rest = rest;
                Some(Ok(command))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(draw_error(e)))
            }
        }
    }
}

impl DrawCommand {
    /// Decodes a single command that must span all of `data`.
    pub fn decode(data: &[u8]) -> Result<DrawCommand> {
        let (rest, command) = parse_command(data).map_err(draw_error)?;
        if !rest.is_empty() {
            return Err(ErrorKind::MalformedDrawCommand(format!(
                "{} trailing bytes after command",
                rest.len()
            ))
            .into());
        }
        Ok(command)
    }
}
