//! Pose snapshot: one complete set of face-tracking measurements.

use std::fmt;
use std::str::FromStr;

use crate::error::MalformedRecord;

/// Number of numeric fields in one wire record.
pub const FIELD_COUNT: usize = 11;

/// 1レコード分のトラッキング値
///
/// 受信のたびに丸ごと置き換える。部分的に更新されることはない。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSnapshot {
    /// 頭部回転 (度)
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    /// Eye aspect ratio, smaller means more closed
    pub ear_left: f32,
    pub ear_right: f32,
    /// 虹彩位置の比率
    pub gaze_x_left: f32,
    pub gaze_y_left: f32,
    pub gaze_x_right: f32,
    pub gaze_y_right: f32,
    pub mouth_aspect_ratio: f32,
    pub mouth_distance: f32,
}

impl PoseSnapshot {
    /// 全フィールド0
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Fields in wire order:
    /// roll pitch yaw earL earR gazeXL gazeYL gazeXR gazeYR mar mouthDist
    pub fn from_fields(f: [f32; FIELD_COUNT]) -> Self {
        Self {
            roll: f[0],
            pitch: f[1],
            yaw: f[2],
            ear_left: f[3],
            ear_right: f[4],
            gaze_x_left: f[5],
            gaze_y_left: f[6],
            gaze_x_right: f[7],
            gaze_y_right: f[8],
            mouth_aspect_ratio: f[9],
            mouth_distance: f[10],
        }
    }

    pub fn to_fields(&self) -> [f32; FIELD_COUNT] {
        [
            self.roll,
            self.pitch,
            self.yaw,
            self.ear_left,
            self.ear_right,
            self.gaze_x_left,
            self.gaze_y_left,
            self.gaze_x_right,
            self.gaze_y_right,
            self.mouth_aspect_ratio,
            self.mouth_distance,
        ]
    }

    /// Build a snapshot from exactly [`FIELD_COUNT`] tokens.
    ///
    /// Either every token parses or nothing is produced.
    pub fn from_tokens<'a, I>(tokens: I) -> Result<Self, MalformedRecord>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut fields = [0.0f32; FIELD_COUNT];
        let mut found = 0usize;
        let mut invalid: Option<&str> = None;

        for token in tokens {
            if found < FIELD_COUNT && invalid.is_none() {
                match parse_field(token) {
                    Some(v) => fields[found] = v,
                    None => invalid = Some(token),
                }
            }
            found += 1;
        }

        if found != FIELD_COUNT {
            return Err(MalformedRecord::WrongArity { found });
        }
        if let Some(token) = invalid {
            return Err(MalformedRecord::InvalidNumber {
                token: token.to_string(),
            });
        }
        Ok(Self::from_fields(fields))
    }

    /// 改行付きのワイヤ形式
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

/// Parse one numeric token. Non-finite values (`inf`, `NaN`) are rejected.
pub fn parse_field(token: &str) -> Option<f32> {
    f32::from_str(token).ok().filter(|v| v.is_finite())
}

impl FromStr for PoseSnapshot {
    type Err = MalformedRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tokens(s.split_ascii_whitespace())
    }
}

/// Space separated wire form. Honors the formatter precision, so
/// `format!("{:.4}", pose)` yields the tracker's fixed 4-decimal output.
impl fmt::Display for PoseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.to_fields().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match f.precision() {
                Some(p) => write!(f, "{:.*}", p, v)?,
                None => write!(f, "{}", v)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_reference_record() {
        let pose: PoseSnapshot = "0 0 0 0.35 0.35 0.5 0.5 0.5 0.5 0.2 70".parse().unwrap();
        assert_eq!(pose.roll, 0.0);
        assert_eq!(pose.pitch, 0.0);
        assert_eq!(pose.yaw, 0.0);
        assert_eq!(pose.ear_left, 0.35);
        assert_eq!(pose.ear_right, 0.35);
        assert_eq!(pose.gaze_y_right, 0.5);
        assert_eq!(pose.mouth_aspect_ratio, 0.2);
        assert_eq!(pose.mouth_distance, 70.0);
    }

    #[test]
    fn test_parse_tolerates_extra_whitespace() {
        let pose: PoseSnapshot = "  1\t2  3 4 5 6 7 8 9 10 11 \r".parse().unwrap();
        assert_eq!(pose.to_fields()[10], 11.0);
        assert_eq!(pose.roll, 1.0);
    }

    #[test]
    fn test_wrong_arity() {
        let err = "1 2 3".parse::<PoseSnapshot>().unwrap_err();
        assert_eq!(err, MalformedRecord::WrongArity { found: 3 });

        let err = "1 2 3 4 5 6 7 8 9 10 11 12".parse::<PoseSnapshot>().unwrap_err();
        assert_eq!(err, MalformedRecord::WrongArity { found: 12 });
    }

    #[test]
    fn test_non_numeric_token() {
        let err = "1 2 3 4 x 6 7 8 9 10 11".parse::<PoseSnapshot>().unwrap_err();
        assert_eq!(
            err,
            MalformedRecord::InvalidNumber {
                token: "x".to_string()
            }
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!("NaN 2 3 4 5 6 7 8 9 10 11".parse::<PoseSnapshot>().is_err());
        assert!("1 2 inf 4 5 6 7 8 9 10 11".parse::<PoseSnapshot>().is_err());
    }

    #[test]
    fn test_fixed_precision_display() {
        let pose = PoseSnapshot::from_fields([1.0, -2.5, 0.0, 0.3, 0.31, 0.5, 0.5, 0.5, 0.5, 0.2, 70.0]);
        assert_eq!(
            format!("{:.4}", pose),
            "1.0000 -2.5000 0.0000 0.3000 0.3100 0.5000 0.5000 0.5000 0.5000 0.2000 70.0000"
        );
    }

    #[test]
    fn test_to_line_is_newline_terminated() {
        let line = PoseSnapshot::neutral().to_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.trim_end().split(' ').count(), FIELD_COUNT);
    }

    proptest! {
        #[test]
        fn prop_display_parse_round_trip(fields in prop::array::uniform11(-1.0e6f32..1.0e6f32)) {
            let pose = PoseSnapshot::from_fields(fields);
            let parsed: PoseSnapshot = pose.to_string().parse().unwrap();
            prop_assert_eq!(parsed.to_fields(), fields);
        }

        #[test]
        fn prop_short_records_rejected(fields in prop::collection::vec(-100.0f32..100.0, 0..FIELD_COUNT)) {
            let line = fields.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
            let err = line.parse::<PoseSnapshot>().unwrap_err();
            prop_assert_eq!(err, MalformedRecord::WrongArity { found: fields.len() });
        }
    }
}
