pub mod codec;
pub mod factory;

pub use codec::FrameCodec;
pub use factory::{
    JsonProtocol, MsgPackProtocol, ProtocolFactory, ProtocolFactorySelector, ProtocolRegistry,
    TextProtocol,
};

use serde::{Deserialize, Serialize};

/// Status codes the remoting core produces on its own.
///
/// Business codes share the same integer space; processors should avoid
/// registering these values.
pub mod command_code {
    pub const SUCCESS: i32 = 0;
    pub const SYSTEM_ERROR: i32 = 1;
    pub const SYSTEM_BUSY: i32 = 2;
    pub const COMMAND_CODE_NOT_SUPPORTED: i32 = 3;
}

const FLAG_REPLY: u8 = 0b0000_0001;
const FLAG_ONEWAY: u8 = 0b0000_0010;

/// Protocol envelope exchanged over a channel.
///
/// Only the fields needed for correlation and routing are interpreted by the
/// remoting core; `body` is opaque and encoded per `protocol`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    code: i32,
    opaque: u64,
    protocol: u8,
    flags: u8,
    body: Vec<u8>,
}

impl Command {
    /// Create an outbound request
    pub fn request(code: i32, opaque: u64) -> Self {
        Self {
            code,
            opaque,
            protocol: TextProtocol::ID,
            flags: 0,
            body: Vec::new(),
        }
    }

    /// Create a response with no opaque yet
    ///
    /// Processors return these; the dispatcher tags them with the request's
    /// opaque and the reply flag before writing.
    pub fn response(code: i32) -> Self {
        Self::request(code, 0)
    }

    /// Create a reply to `request` carrying `code`
    ///
    /// Echoes the request's opaque and protocol and sets the reply flag.
    pub fn reply_to(request: &Command, code: i32) -> Self {
        Self {
            code,
            opaque: request.opaque,
            protocol: request.protocol,
            flags: FLAG_REPLY,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn opaque(&self) -> u64 {
        self.opaque
    }

    pub fn set_opaque(&mut self, opaque: u64) {
        self.opaque = opaque;
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn is_reply(&self) -> bool {
        self.flags & FLAG_REPLY != 0
    }

    pub fn set_reply(&mut self) {
        self.flags |= FLAG_REPLY;
    }

    pub fn is_oneway(&self) -> bool {
        self.flags & FLAG_ONEWAY != 0
    }

    pub fn set_oneway(&mut self) {
        self.flags |= FLAG_ONEWAY;
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Command[code={}, opaque={}, protocol={}, reply={}, oneway={}, body={}B]",
            self.code,
            self.opaque,
            self.protocol,
            self.is_reply(),
            self.is_oneway(),
            self.body.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let cmd = Command::request(7, 42);
        assert_eq!(cmd.code(), 7);
        assert_eq!(cmd.opaque(), 42);
        assert!(!cmd.is_reply());
        assert!(!cmd.is_oneway());
        assert!(cmd.body().is_empty());
    }

    #[test]
    fn test_reply_to_echoes_opaque_and_protocol() {
        let request = Command::request(7, 42).with_protocol(JsonProtocol::ID);
        let reply = Command::reply_to(&request, command_code::SYSTEM_BUSY);

        assert_eq!(reply.opaque(), 42);
        assert_eq!(reply.protocol(), JsonProtocol::ID);
        assert_eq!(reply.code(), command_code::SYSTEM_BUSY);
        assert!(reply.is_reply());
        assert!(!reply.is_oneway());
    }

    #[test]
    fn test_flags_are_independent() {
        let mut cmd = Command::request(1, 1);
        cmd.set_oneway();
        assert!(cmd.is_oneway());
        assert!(!cmd.is_reply());

        cmd.set_reply();
        assert!(cmd.is_oneway());
        assert!(cmd.is_reply());
    }

    #[test]
    fn test_display() {
        let cmd = Command::request(3, 9).with_body("abc");
        let text = cmd.to_string();
        assert!(text.contains("code=3"));
        assert!(text.contains("opaque=9"));
        assert!(text.contains("body=3B"));
    }
}
