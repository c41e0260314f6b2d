//! JSON bodies exchanged over the IPC socket.
//!
//! Field names and the `matches` layout follow the deployed bridge, so its
//! satellites keep working: `matches` holds the matched body first, then the
//! capture fields.
//!
//! ```text
//! satellite -> server  {"ipcCounter":3,"priority":1,"cmd":"FADEDIM, 40, 2, 0, [1.1.2.4]"}
//! server -> satellite  {"outCounter":17,"outType":1,"matches":["DL, [01:01:00:02:04], 40","01:01:00:02:04","40"]}
//! ```

use hwi_core::Priority;
use hwi_protocol::{DecodedFrame, FrameKind};
use serde::{Deserialize, Serialize};

/// Command forwarded by a satellite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcRequest {
    /// Satellite-local sequence number
    #[serde(rename = "ipcCounter")]
    pub counter: u64,

    pub priority: Priority,

    /// Command text without line terminator
    pub cmd: String,
}

/// Decoded frame broadcast by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcOutput {
    /// Server decode counter
    #[serde(rename = "outCounter")]
    pub counter: u64,

    /// Frame kind id
    #[serde(rename = "outType")]
    pub out_type: u8,

    /// Matched body, then capture fields in grammar order
    #[serde(default)]
    pub matches: Vec<String>,
}

impl IpcOutput {
    /// Rebuild the frame on the satellite side.
    ///
    /// Returns `None` for frame kinds this build does not know, or when
    /// `matches` is empty.
    pub fn to_frame(&self) -> Option<DecodedFrame> {
        let kind = FrameKind::from_id(self.out_type)?;
        let (text, fields) = self.matches.split_first()?;
        Some(DecodedFrame::new(kind, self.counter, fields.to_vec()).with_text(text.as_str()))
    }
}

impl From<&DecodedFrame> for IpcOutput {
    fn from(frame: &DecodedFrame) -> Self {
        let matches = std::iter::once(frame.text.clone())
            .chain(frame.fields.iter().cloned())
            .collect();

        Self {
            counter: frame.counter,
            out_type: frame.kind.id(),
            matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwi_core::CanonicalAddress;
    use hwi_protocol::LightingEvent;
    use rstest::rstest;

    #[test]
    fn test_request_wire_names() {
        let request = IpcRequest {
            counter: 3,
            priority: Priority::High,
            cmd: "RDL, [1.1.2.4]".to_string(),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"ipcCounter":3,"priority":1,"cmd":"RDL, [1.1.2.4]"}"#);
    }

    #[rstest]
    #[case(1, Priority::High)]
    #[case(2, Priority::Standard)]
    #[case(3, Priority::Low)]
    fn test_request_priority_values(#[case] wire: u8, #[case] expected: Priority) {
        let json = format!(r#"{{"ipcCounter":9,"priority":{wire},"cmd":"DLMON"}}"#);
        let request: IpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.priority, expected);
        assert_eq!(request.counter, 9);
    }

    #[test]
    fn test_request_rejects_unknown_priority() {
        let result = serde_json::from_str::<IpcRequest>(r#"{"ipcCounter":1,"priority":7,"cmd":"RDL"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_output_from_frame() {
        let frame = DecodedFrame::new(
            FrameKind::DimLevel,
            17,
            vec!["01:01:00:02:04".to_string(), "40".to_string()],
        )
        .with_text("DL, [01:01:00:02:04], 40");

        let output = IpcOutput::from(&frame);
        let json = serde_json::to_string(&output).unwrap();
        assert_eq!(
            json,
            r#"{"outCounter":17,"outType":1,"matches":["DL, [01:01:00:02:04], 40","01:01:00:02:04","40"]}"#
        );
        assert_eq!(output.to_frame(), Some(frame));
    }

    #[test]
    fn test_deployed_broadcast_decodes() {
        // Address at matches[1], level at matches[2]
        let output: IpcOutput = serde_json::from_str(
            r#"{"outCounter":4,"outType":1,"matches":["DL, [01:01:00:02:04], 65","01:01:00:02:04","65"]}"#,
        )
        .unwrap();

        let frame = output.to_frame().unwrap();
        assert_eq!(frame.text, "DL, [01:01:00:02:04], 65");
        assert_eq!(
            frame.event().unwrap(),
            LightingEvent::DimLevel {
                address: CanonicalAddress::parse("1.1.0.2.4").unwrap(),
                level: 65,
            }
        );
    }

    #[test]
    fn test_output_unknown_kind() {
        let output: IpcOutput =
            serde_json::from_str(r#"{"outCounter":2,"outType":99,"matches":[]}"#).unwrap();
        assert!(output.to_frame().is_none());
    }

    #[test]
    fn test_output_missing_matches() {
        let output: IpcOutput = serde_json::from_str(r#"{"outCounter":2,"outType":1}"#).unwrap();
        assert!(output.matches.is_empty());
        assert!(output.to_frame().is_none());
    }
}
