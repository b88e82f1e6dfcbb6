//! Minimal STOMP 1.2 framing for the log topic.
//!
//! Only what a read-only subscriber needs: building `CONNECT`, `SUBSCRIBE`
//! and `DISCONNECT`, and decoding the server frames carried in WebSocket
//! text messages. Heart-beat EOLs between frames are skipped.

use crate::error::{Result, ViewerError};

const NUL: char = '\0';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// First value of a header; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, auth_token: Option<&str>) -> Self {
        let frame = Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0");
        match auth_token {
            Some(token) => frame.header("Authorization", &format!("Bearer {}", token)),
            None => frame,
        }
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new("DISCONNECT").header("receipt", receipt)
    }

    pub fn encode(&self) -> String {
        let escape = !matches!(self.command.as_str(), "CONNECT" | "CONNECTED");
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decodes every frame in one transport message. A message holding only
    /// heart-beats yields an empty list.
    pub fn decode_all(text: &str) -> Result<Vec<Frame>> {
        let mut frames = Vec::new();
        let mut rest = text;
        loop {
            rest = rest.trim_start_matches(['\r', '\n']);
            if rest.is_empty() {
                return Ok(frames);
            }
            let (frame, remaining) = decode_one(rest)?;
            frames.push(frame);
            rest = remaining;
        }
    }
}

fn decode_one(text: &str) -> Result<(Frame, &str)> {
    let (command, mut rest) = split_line(text)
        .ok_or_else(|| ViewerError::StompError("frame without command line".to_string()))?;
    let mut frame = Frame::new(command);
    let unescape = !matches!(command, "CONNECT" | "CONNECTED");

    loop {
        let (line, remaining) = split_line(rest)
            .ok_or_else(|| ViewerError::StompError("unterminated frame headers".to_string()))?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            ViewerError::StompError(format!("malformed header line: {:?}", line))
        })?;
        if unescape {
            frame.headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            frame.headers.push((name.to_string(), value.to_string()));
        }
    }

    let body_len = match frame.get("content-length") {
        Some(value) => {
            let len: usize = value.trim().parse().map_err(|_| {
                ViewerError::StompError(format!("invalid content-length: {}", value))
            })?;
            if len > rest.len() || !rest.is_char_boundary(len) {
                return Err(ViewerError::StompError(
                    "content-length exceeds frame".to_string(),
                ));
            }
            len
        }
        None => rest
            .find(NUL)
            .ok_or_else(|| ViewerError::StompError("frame missing NUL terminator".to_string()))?,
    };

    frame.body = rest[..body_len].to_string();
    let rest = &rest[body_len..];
    let rest = rest
        .strip_prefix(NUL)
        .ok_or_else(|| ViewerError::StompError("frame missing NUL terminator".to_string()))?;

    Ok((frame, rest))
}

fn split_line(text: &str) -> Option<(&str, &str)> {
    let (line, rest) = text.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(ViewerError::StompError(format!(
                    "undefined header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
