// Gaze record schema and frame decoding
//
// One frame on the wire is a single JSON object:
//
//   {"gaze2d":[x,y],"gazePixelCoords":[x,y],"gaze3d":[x,y,z],
//    "eyeleft":{"gazeorigin":[x,y,z],"gazedirection":[x,y,z],"pupildiameter":d},
//    "eyeright":{...}}
//
// Decoding builds a fresh value and either returns it whole or fails; nothing
// partially decoded is ever handed on.

use crate::streaming::types::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};

/// Per-eye measurements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EyeData {
    #[serde(rename = "gazeorigin")]
    pub origin: [f32; 3],

    #[serde(rename = "gazedirection")]
    pub direction: [f32; 3],

    #[serde(rename = "pupildiameter")]
    pub pupil_diameter: f32,
}

/// One decoded gaze sample from the tracker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GazeRecord {
    /// Normalized 2D gaze point
    pub gaze2d: [f32; 2],

    /// Gaze point in display pixel space
    #[serde(rename = "gazePixelCoords")]
    pub gaze_pixel_coords: [f32; 2],

    /// 3D gaze point in tracker space
    pub gaze3d: [f32; 3],

    #[serde(rename = "eyeleft")]
    pub left_eye: EyeData,

    #[serde(rename = "eyeright")]
    pub right_eye: EyeData,
}

/// Decode one trimmed frame into a [`GazeRecord`]
///
/// Malformed JSON, a missing key, a wrong type or a wrong array length all
/// produce [`StreamError::Decode`].
pub fn decode_frame(frame: &[u8]) -> StreamResult<GazeRecord> {
    let record: GazeRecord = serde_json::from_slice(frame)?;
    record.validate()?;
    Ok(record)
}

impl GazeRecord {
    fn validate(&self) -> StreamResult<()> {
        let finite = self
            .gaze2d
            .iter()
            .chain(&self.gaze_pixel_coords)
            .chain(&self.gaze3d)
            .chain(self.left_eye.values())
            .chain(self.right_eye.values())
            .all(|v| v.is_finite());

        if finite {
            Ok(())
        } else {
            Err(StreamError::Decode("non-finite value in gaze record".into()))
        }
    }

    /// Per-field values keyed by output topic, in a fixed order
    pub fn topics(&self) -> [(&'static str, TopicValue); 9] {
        [
            (topics::GAZE_2D, TopicValue::Vec2(self.gaze2d)),
            (
                topics::PIXEL_COORDINATES,
                TopicValue::Vec2(self.gaze_pixel_coords),
            ),
            (topics::GAZE_3D, TopicValue::Vec3(self.gaze3d)),
            (topics::LEFT_EYE_ORIGIN, TopicValue::Vec3(self.left_eye.origin)),
            (
                topics::LEFT_EYE_DIRECTION,
                TopicValue::Vec3(self.left_eye.direction),
            ),
            (
                topics::LEFT_PUPIL_DIAMETER,
                TopicValue::Scalar(self.left_eye.pupil_diameter),
            ),
            (topics::RIGHT_EYE_ORIGIN, TopicValue::Vec3(self.right_eye.origin)),
            (
                topics::RIGHT_EYE_DIRECTION,
                TopicValue::Vec3(self.right_eye.direction),
            ),
            (
                topics::RIGHT_PUPIL_DIAMETER,
                TopicValue::Scalar(self.right_eye.pupil_diameter),
            ),
        ]
    }
}

impl EyeData {
    fn values(&self) -> impl Iterator<Item = &f32> {
        self.origin
            .iter()
            .chain(&self.direction)
            .chain(std::iter::once(&self.pupil_diameter))
    }
}

/// A single field republished to a named topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TopicValue {
    Scalar(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
}

/// Output topic names for per-field fan-out
pub mod topics {
    pub const GAZE_2D: &str = "gaze/gaze2d";
    pub const PIXEL_COORDINATES: &str = "gaze/pixel_coordinates";
    pub const GAZE_3D: &str = "gaze/gaze3d";
    pub const LEFT_EYE_ORIGIN: &str = "gaze/left_eye_origin";
    pub const LEFT_EYE_DIRECTION: &str = "gaze/left_eye_direction";
    pub const LEFT_PUPIL_DIAMETER: &str = "gaze/left_pupil_diameter";
    pub const RIGHT_EYE_ORIGIN: &str = "gaze/right_eye_origin";
    pub const RIGHT_EYE_DIRECTION: &str = "gaze/right_eye_direction";
    pub const RIGHT_PUPIL_DIAMETER: &str = "gaze/right_pupil_diameter";
}
