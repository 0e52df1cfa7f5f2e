use anyhow::Result;
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::net::UdpSocket;

use crate::rig::{BlendShapeFrame, RigFrame};

/// VMC receiver default (VSeeFace etc.)
pub const OSC_DEFAULT_ADDR: &str = "127.0.0.1:39539";

pub const BLEND_VAL_ADDR: &str = "/VMC/Ext/Blend/Val";
pub const BLEND_APPLY_ADDR: &str = "/VMC/Ext/Blend/Apply";
pub const BONE_POS_ADDR: &str = "/VMC/Ext/Bone/Pos";

const IMMEDIATELY: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// パラメータ1つ分のメッセージ
pub fn build_blend_message(name: &str, value: f32) -> OscMessage {
    OscMessage {
        addr: BLEND_VAL_ADDR.to_string(),
        args: vec![OscType::String(name.to_string()), OscType::Float(value)],
    }
}

/// ネックボーンの回転
/// 引数: name, px, py, pz, qx, qy, qz, qw
pub fn build_neck_message(frame: &BlendShapeFrame) -> OscMessage {
    let q = frame.neck_rotation.quaternion();
    OscMessage {
        addr: BONE_POS_ADDR.to_string(),
        args: vec![
            OscType::String("Neck".to_string()),
            OscType::Float(0.0),
            OscType::Float(0.0),
            OscType::Float(0.0),
            OscType::Float(q.i),
            OscType::Float(q.j),
            OscType::Float(q.k),
            OscType::Float(q.w),
        ],
    }
}

/// One bundle per frame: every parameter, bone rotation if any, then Apply.
pub fn build_frame_packet(frame: &RigFrame) -> OscPacket {
    let mut content: Vec<OscPacket> = frame
        .parameters()
        .into_iter()
        .map(|(name, value)| OscPacket::Message(build_blend_message(name, value)))
        .collect();

    if let RigFrame::BlendShape(frame) = frame {
        content.push(OscPacket::Message(build_neck_message(frame)));
    }

    content.push(OscPacket::Message(OscMessage {
        addr: BLEND_APPLY_ADDR.to_string(),
        args: vec![],
    }));

    OscPacket::Bundle(OscBundle {
        timetag: IMMEDIATELY,
        content,
    })
}

pub fn encode_packet(packet: &OscPacket) -> Result<Vec<u8>> {
    let encoded = encoder::encode(packet)?;
    Ok(encoded)
}

/// リグ出力をOSCで送るクライアント
pub struct OscSink {
    socket: UdpSocket,
    target_addr: String,
}

impl OscSink {
    pub fn new(target_addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
        })
    }

    pub fn target_addr(&self) -> &str {
        &self.target_addr
    }

    pub fn send(&self, frame: &RigFrame) -> Result<()> {
        let data = encode_packet(&build_frame_packet(frame))?;
        self.socket.send_to(&data, &self.target_addr)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::PoseSnapshot;
    use crate::rig::{BlendShapeCalibration, BlendShapeRig, Live2dCalibration, Live2dRig};
    use std::time::Duration;

    fn bundle_content(packet: OscPacket) -> Vec<OscMessage> {
        match packet {
            OscPacket::Bundle(bundle) => bundle
                .content
                .into_iter()
                .map(|p| match p {
                    OscPacket::Message(m) => m,
                    OscPacket::Bundle(_) => panic!("nested bundle"),
                })
                .collect(),
            OscPacket::Message(_) => panic!("expected bundle"),
        }
    }

    fn blend_shape_frame() -> RigFrame {
        let rig = BlendShapeRig::new(BlendShapeCalibration::default());
        RigFrame::BlendShape(rig.frame_for(&PoseSnapshot::neutral()))
    }

    #[test]
    fn test_blend_message_args() {
        let msg = build_blend_message("ParamAngleX", 12.5);
        assert_eq!(msg.addr, BLEND_VAL_ADDR);
        assert_eq!(msg.args[0], OscType::String("ParamAngleX".to_string()));
        assert_eq!(msg.args[1], OscType::Float(12.5));
    }

    #[test]
    fn test_blend_shape_packet_layout() {
        let messages = bundle_content(build_frame_packet(&blend_shape_frame()));
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].addr, BLEND_VAL_ADDR);
        assert_eq!(messages[2].addr, BONE_POS_ADDR);
        assert_eq!(messages[2].args.len(), 8);
        assert_eq!(messages[3].addr, BLEND_APPLY_ADDR);
    }

    #[test]
    fn test_live2d_packet_layout() {
        let rig = Live2dRig::new(Live2dCalibration::default());
        let frame = RigFrame::Live2d(rig.frame_for(&PoseSnapshot::neutral()));
        let messages = bundle_content(build_frame_packet(&frame));
        assert_eq!(messages.len(), 11);
        assert!(messages.iter().all(|m| m.addr != BONE_POS_ADDR));
        assert_eq!(messages.last().unwrap().addr, BLEND_APPLY_ADDR);
    }

    #[test]
    fn test_sink_sends_decodable_bundle() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let sink = OscSink::new(&receiver.local_addr().unwrap().to_string()).unwrap();

        sink.send(&blend_shape_frame()).unwrap();

        let mut buf = [0u8; rosc::decoder::MTU];
        let len = receiver.recv(&mut buf).unwrap();
        let (_, packet) = rosc::decoder::decode_udp(&buf[..len]).unwrap();
        assert_eq!(bundle_content(packet).len(), 4);
    }
}
