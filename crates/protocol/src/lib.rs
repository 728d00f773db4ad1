//! treffpunkt-protocol – Wire-Format des Signaling-Relays
//!
//! Dieses Crate definiert den Envelope, den Client und Relay austauschen,
//! das typisierte Dekodieren eingehender Frames und den Frame-Codec fuer TCP.

pub mod envelope;
pub mod wire;

pub use envelope::{
    dekodieren, AushandlungsArt, ClientNachricht, DecodeFehler, Envelope, FehlerGrund,
    NachrichtenTyp,
};
pub use wire::FrameCodec;
