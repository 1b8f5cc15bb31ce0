// ABOUTME: Wire framing for agent links: status decoding and command encoding.
// ABOUTME: Delimited JSON status frames in, `<json>;$` control and `<x>,<y>\n` navigation out.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CommandDropped, DropReason, FleetError, Result};
use crate::types::{Channel, ControlCommand, NavigationCommand, Position, StatusRecord};

/// Default upper bound for one buffered status frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Default decimal places for navigation coordinates.
pub const DEFAULT_NAVIGATION_PRECISION: usize = 2;

/// Largest precision accepted for navigation coordinates.
pub const MAX_NAVIGATION_PRECISION: usize = 9;

/// Suffix the firmware expects after each control JSON object.
pub const CONTROL_TERMINATOR: &[u8] = b";$";

/// Splits the status byte stream on a delimiter and parses each frame.
///
/// Bytes without a delimiter stay buffered across calls. A frame that fails to
/// parse is consumed and reported as an error; calling `decode` again resumes
/// with the next frame.
#[derive(Debug, Clone)]
pub struct StatusDecoder {
    delimiter: u8,
    max_frame_bytes: usize,
    // Where to resume the delimiter scan in the buffer.
    next_index: usize,
    // Skipping the rest of an oversized frame.
    discarding: bool,
}

impl Default for StatusDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl StatusDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            delimiter: b'\n',
            max_frame_bytes,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Forget partial-frame bookkeeping (the caller clears its buffer too).
    pub fn reset(&mut self) {
        self.next_index = 0;
        self.discarding = false;
    }
}

impl Decoder for StatusDecoder {
    type Item = StatusRecord;
    type Error = FleetError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<StatusRecord>> {
        loop {
            let start = self.next_index.min(buf.len());
            let Some(offset) = buf[start..].iter().position(|b| *b == self.delimiter) else {
                if buf.len() > self.max_frame_bytes {
                    buf.clear();
                    self.next_index = 0;
                    if !self.discarding {
                        self.discarding = true;
                        return Err(FleetError::FrameTooLong {
                            limit: self.max_frame_bytes,
                        });
                    }
                } else {
                    self.next_index = buf.len();
                }
                return Ok(None);
            };

            let end = start + offset;
            let frame = buf.split_to(end + 1);
            self.next_index = 0;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if end > self.max_frame_bytes {
                return Err(FleetError::FrameTooLong {
                    limit: self.max_frame_bytes,
                });
            }

            let body = frame[..end].trim_ascii();
            if body.is_empty() {
                continue;
            }
            return parse_status(body).map(Some);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStatus {
    cmd_vel: Option<RawTwist>,
    odom: Option<RawOdometry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTwist {
    linear: Option<RawAxes>,
    angular: Option<RawAxes>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAxes {
    x: Option<f64>,
    z: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOdometry {
    position: Option<RawPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPosition {
    Point { x: f64, y: f64 },
    Seq(Vec<f64>),
}

/// Parse one status frame body (delimiter already stripped).
///
/// Missing fields default to zero / no position; a non-object or wrongly typed
/// field is a `MalformedFrame`.
pub fn parse_status(frame: &[u8]) -> Result<StatusRecord> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| FleetError::MalformedFrame(format!("invalid utf-8: {e}")))?;
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FleetError::MalformedFrame(e.to_string()))?;
    if !value.is_object() {
        return Err(FleetError::MalformedFrame(
            "status frame is not a JSON object".to_string(),
        ));
    }
    let raw: RawStatus =
        serde_json::from_value(value).map_err(|e| FleetError::MalformedFrame(e.to_string()))?;

    let position = match raw.odom.and_then(|odom| odom.position) {
        None => None,
        Some(RawPosition::Point { x, y }) => Some(Position::new(x, y)),
        Some(RawPosition::Seq(values)) => match values.as_slice() {
            [x, y, ..] => Some(Position::new(*x, *y)),
            _ => {
                return Err(FleetError::MalformedFrame(format!(
                    "position needs at least 2 coordinates, got {}",
                    values.len()
                )))
            }
        },
    };

    let twist = raw.cmd_vel.unwrap_or_default();
    Ok(StatusRecord {
        linear_velocity: twist.linear.and_then(|axes| axes.x).unwrap_or(0.0),
        angular_velocity: twist.angular.and_then(|axes| axes.z).unwrap_or(0.0),
        position,
    })
}

/// Format a float with exactly `precision` decimals, never in exponent form.
///
/// Negative zero after rounding is printed without its sign.
pub fn format_fixed(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*}", precision, value);
    match formatted.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_string(),
        _ => formatted,
    }
}

#[derive(Serialize)]
struct ControlPayload {
    linear_x: f64,
    angular_z: f64,
}

/// Encodes control commands as `{"linear_x":..,"angular_z":..};$`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlEncoder;

impl<'a> Encoder<&'a ControlCommand> for ControlEncoder {
    type Error = FleetError;

    fn encode(&mut self, cmd: &'a ControlCommand, dst: &mut BytesMut) -> Result<()> {
        if !cmd.linear_x.is_finite() || !cmd.angular_z.is_finite() {
            return Err(CommandDropped {
                agent_id: cmd.agent_id.clone(),
                channel: Channel::Control,
                reason: DropReason::NonFiniteValue,
            }
            .into());
        }
        let payload = serde_json::to_vec(&ControlPayload {
            linear_x: cmd.linear_x,
            angular_z: cmd.angular_z,
        })?;
        dst.reserve(payload.len() + CONTROL_TERMINATOR.len());
        dst.put_slice(&payload);
        dst.put_slice(CONTROL_TERMINATOR);
        Ok(())
    }
}

/// Encodes navigation goals as `<x>,<y>\n` with fixed precision.
#[derive(Debug, Clone, Copy)]
pub struct NavigationEncoder {
    precision: usize,
}

impl Default for NavigationEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_NAVIGATION_PRECISION)
    }
}

impl NavigationEncoder {
    pub fn new(precision: usize) -> Self {
        Self {
            precision: precision.min(MAX_NAVIGATION_PRECISION),
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }
}

impl<'a> Encoder<&'a NavigationCommand> for NavigationEncoder {
    type Error = FleetError;

    fn encode(&mut self, cmd: &'a NavigationCommand, dst: &mut BytesMut) -> Result<()> {
        if !cmd.position.is_finite() {
            return Err(CommandDropped {
                agent_id: cmd.agent_id.clone(),
                channel: Channel::Navigation,
                reason: DropReason::NonFiniteValue,
            }
            .into());
        }
        let line = format!(
            "{},{}\n",
            format_fixed(cmd.position.x, self.precision),
            format_fixed(cmd.position.y, self.precision)
        );
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentId;

    fn decode_all(decoder: &mut StatusDecoder, buf: &mut BytesMut) -> Vec<Result<StatusRecord>> {
        let mut out = Vec::new();
        loop {
            match decoder.decode(buf) {
                Ok(Some(record)) => out.push(Ok(record)),
                Ok(None) => return out,
                Err(e) => out.push(Err(e)),
            }
        }
    }

    #[test]
    fn test_parse_full_status() {
        let record = parse_status(
            br#"{"cmd_vel":{"linear":{"x":0.5,"y":0,"z":0},"angular":{"x":0,"y":0,"z":-0.25}},"odom":{"position":{"x":933.28,"y":-428.75,"z":0}}}"#,
        )
        .unwrap();
        assert_eq!(record.linear_velocity, 0.5);
        assert_eq!(record.angular_velocity, -0.25);
        assert_eq!(record.position, Some(Position::new(933.28, -428.75)));
    }

    #[test]
    fn test_parse_missing_fields_default() {
        let record = parse_status(b"{}").unwrap();
        assert_eq!(record, StatusRecord::default());

        let record = parse_status(br#"{"cmd_vel":{"linear":{"x":1.5}}}"#).unwrap();
        assert_eq!(record.linear_velocity, 1.5);
        assert_eq!(record.angular_velocity, 0.0);
        assert_eq!(record.position, None);

        let record = parse_status(br#"{"cmd_vel":null,"odom":{"position":null}}"#).unwrap();
        assert_eq!(record, StatusRecord::default());
    }

    #[test]
    fn test_parse_position_as_array() {
        let record = parse_status(br#"{"odom":{"position":[1.0,2.0,0.0]}}"#).unwrap();
        assert_eq!(record.position, Some(Position::new(1.0, 2.0)));

        let err = parse_status(br#"{"odom":{"position":[1.0]}}"#).unwrap_err();
        assert!(matches!(err, FleetError::MalformedFrame(_)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for frame in [
            &b"not json"[..],
            &b"[1,2]"[..],
            &b"42"[..],
            &br#"{"cmd_vel":{"linear":{"x":"fast"}}}"#[..],
            &b"\xff\xfe"[..],
        ] {
            let err = parse_status(frame).unwrap_err();
            assert!(
                matches!(err, FleetError::MalformedFrame(_)),
                "expected MalformedFrame for {:?}, got {:?}",
                String::from_utf8_lossy(frame),
                err
            );
        }
    }

    #[test]
    fn test_decoder_buffers_partial_frame() {
        let mut decoder = StatusDecoder::default();
        let mut buf = BytesMut::from(&br#"{"cmd_vel":{"lin"#[..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(br#"ear":{"x":0.75}}}"#);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"\n");
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.linear_velocity, 0.75);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_multiple_frames_in_one_read() {
        let mut decoder = StatusDecoder::default();
        let mut buf = BytesMut::from(
            &b"{\"cmd_vel\":{\"linear\":{\"x\":1}}}\r\n\n{\"cmd_vel\":{\"linear\":{\"x\":2}}}\n{\"cmd"[..],
        );
        let records = decode_all(&mut decoder, &mut buf);
        let velocities: Vec<f64> = records
            .into_iter()
            .map(|r| r.unwrap().linear_velocity)
            .collect();
        assert_eq!(velocities, vec![1.0, 2.0]);
        assert_eq!(&buf[..], b"{\"cmd");
    }

    #[test]
    fn test_decoder_skips_malformed_and_continues() {
        let mut decoder = StatusDecoder::default();
        let mut buf = BytesMut::from(&b"{broken\n{\"cmd_vel\":{\"angular\":{\"z\":0.1}}}\n"[..]);
        let results = decode_all(&mut decoder, &mut buf);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(FleetError::MalformedFrame(_))));
        assert_eq!(results[1].as_ref().unwrap().angular_velocity, 0.1);
    }

    #[test]
    fn test_decoder_discards_oversized_frame() {
        let mut decoder = StatusDecoder::new(16);
        let mut buf = BytesMut::from(&[b'a'; 20][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FleetError::FrameTooLong { limit: 16 })
        ));
        assert!(buf.is_empty());

        // Tail of the oversized frame, then a good one.
        buf.extend_from_slice(b"aaaa\n{}\n");
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record, StatusRecord::default());
    }

    #[test]
    fn test_decoder_custom_delimiter() {
        let mut decoder = StatusDecoder::default().with_delimiter(0);
        let mut buf = BytesMut::from(&b"{\"cmd_vel\":{\"linear\":{\"x\":3}}}\0"[..]);
        let record = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(record.linear_velocity, 3.0);
    }

    #[test]
    fn test_format_fixed() {
        assert_eq!(format_fixed(933.28, 2), "933.28");
        assert_eq!(format_fixed(-428.75, 2), "-428.75");
        assert_eq!(format_fixed(1.0, 3), "1.000");
        assert_eq!(format_fixed(1e-7, 2), "0.00");
        assert_eq!(format_fixed(-0.001, 2), "0.00");
        assert_eq!(format_fixed(-0.0, 2), "0.00");
        assert_eq!(format_fixed(1e21, 1), "1000000000000000000000.0");
        assert_eq!(format_fixed(0.125, 0), "0");
    }

    #[test]
    fn test_navigation_encoding_exact() {
        let mut encoder = NavigationEncoder::default();
        let mut dst = BytesMut::new();
        let cmd = NavigationCommand {
            agent_id: AgentId::from(1),
            position: Position::new(933.28, -428.75),
        };
        encoder.encode(&cmd, &mut dst).unwrap();
        assert_eq!(&dst[..], b"933.28,-428.75\n");
    }

    #[test]
    fn test_navigation_precision_has_no_drift() {
        let mut encoder = NavigationEncoder::new(3);
        for (x, y, expected) in [
            (0.1 + 0.2, 2.675, "0.300,2.675\n"),
            (123456.789, -0.25, "123456.789,-0.250\n"),
            (10.0, 20.5, "10.000,20.500\n"),
        ] {
            let mut dst = BytesMut::new();
            let cmd = NavigationCommand {
                agent_id: AgentId::from(1),
                position: Position::new(x, y),
            };
            encoder.encode(&cmd, &mut dst).unwrap();
            let line = std::str::from_utf8(&dst).unwrap();
            assert_eq!(line, expected);
            assert!(!line.contains('e') && !line.contains('E'));
        }
    }

    #[test]
    fn test_navigation_rejects_non_finite() {
        let mut encoder = NavigationEncoder::default();
        let mut dst = BytesMut::new();
        let cmd = NavigationCommand {
            agent_id: AgentId::from(4),
            position: Position::new(f64::NAN, 1.0),
        };
        let err = encoder.encode(&cmd, &mut dst).unwrap_err();
        match err {
            FleetError::CommandDropped(dropped) => {
                assert_eq!(dropped.reason, DropReason::NonFiniteValue);
                assert_eq!(dropped.channel, Channel::Navigation);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(dst.is_empty());
    }

    #[test]
    fn test_control_encoding() {
        let mut encoder = ControlEncoder;
        let mut dst = BytesMut::new();
        let cmd = ControlCommand {
            agent_id: AgentId::from(1),
            linear_x: 0.5,
            angular_z: -0.25,
        };
        encoder.encode(&cmd, &mut dst).unwrap();
        assert_eq!(&dst[..], br#"{"linear_x":0.5,"angular_z":-0.25};$"#);
    }

    #[test]
    fn test_control_rejects_infinite() {
        let mut encoder = ControlEncoder;
        let mut dst = BytesMut::new();
        let cmd = ControlCommand {
            agent_id: AgentId::from(1),
            linear_x: f64::INFINITY,
            angular_z: 0.0,
        };
        assert!(matches!(
            encoder.encode(&cmd, &mut dst),
            Err(FleetError::CommandDropped(_))
        ));
    }
}
