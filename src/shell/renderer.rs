use super::CloseReason;
use std::io::Write;
use tokio::sync::mpsc;

/// Where decorated shell output ends up
///
/// `render` always receives the whole decorated buffer and replaces what
/// was shown before.
pub trait TerminalRenderer {
    fn render(&mut self, text: &str);
    fn clear_screen(&mut self);
    fn closed(&mut self, _reason: &CloseReason) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Render(String),
    Clear,
    Closed(CloseReason),
}

/// Forwards frames to whichever thread owns the real view
pub struct ChannelRenderer {
    tx: mpsc::UnboundedSender<Frame>,
}

impl ChannelRenderer {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TerminalRenderer for ChannelRenderer {
    fn render(&mut self, text: &str) {
        let _ = self.tx.send(Frame::Render(text.to_string()));
    }

    fn clear_screen(&mut self) {
        let _ = self.tx.send(Frame::Clear);
    }

    fn closed(&mut self, reason: &CloseReason) {
        let _ = self.tx.send(Frame::Closed(reason.clone()));
    }
}

const TAIL_BYTES: usize = 64;

/// Prints only what was appended since the previous frame
pub struct StdoutRenderer<W: Write = std::io::Stdout> {
    out: W,
    shown_len: usize,
    shown_tail: String,
}

impl StdoutRenderer {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for StdoutRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> StdoutRenderer<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            shown_len: 0,
            shown_tail: String::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Offset in `text` where unseen output starts
    fn unseen_from(&self, text: &str) -> usize {
        if text.len() >= self.shown_len
            && text.is_char_boundary(self.shown_len)
            && text[..self.shown_len].ends_with(&self.shown_tail)
        {
            return self.shown_len;
        }
        // the buffer was trimmed at the front
        match text.rfind(&self.shown_tail) {
            Some(pos) if !self.shown_tail.is_empty() => pos + self.shown_tail.len(),
            _ => 0,
        }
    }
}

impl<W: Write> TerminalRenderer for StdoutRenderer<W> {
    fn render(&mut self, text: &str) {
        let from = self.unseen_from(text);
        let _ = self.out.write_all(text[from..].as_bytes());
        let _ = self.out.flush();

        let mut tail_start = text.len().saturating_sub(TAIL_BYTES);
        while !text.is_char_boundary(tail_start) {
            tail_start += 1;
        }
        self.shown_len = text.len();
        self.shown_tail = text[tail_start..].to_string();
    }

    fn clear_screen(&mut self) {
        let _ = self.out.write_all(b"\x1b[2J\x1b[H");
        let _ = self.out.flush();
        self.shown_len = 0;
        self.shown_tail.clear();
    }

    fn closed(&mut self, reason: &CloseReason) {
        tracing::debug!("Renderer closed: {:?}", reason);
        let _ = self.out.write_all(b"\r\n");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_renderer_prints_deltas() {
        let mut renderer = StdoutRenderer::with_writer(Vec::new());
        renderer.render("pi@pi:~$ ");
        renderer.render("pi@pi:~$ ls\r\n");
        renderer.clear_screen();
        renderer.render("fresh");

        let printed = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(printed, "pi@pi:~$ ls\r\n\x1b[2J\x1b[Hfresh");
    }

    #[test]
    fn test_stdout_renderer_handles_front_trim() {
        let first = format!("{}prompt$ ", "x".repeat(100));
        let mut renderer = StdoutRenderer::with_writer(Vec::new());
        renderer.render(&first);
        renderer.render(&format!("{}uptime", &first[20..]));

        let printed = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(printed, format!("{}uptime", first));
    }

    #[test]
    fn test_channel_renderer_forwards_frames() {
        let (mut renderer, mut rx) = ChannelRenderer::pair();
        renderer.render("hi");
        renderer.clear_screen();
        renderer.closed(&CloseReason::CommandFinished);

        assert_eq!(rx.try_recv().unwrap(), Frame::Render("hi".into()));
        assert_eq!(rx.try_recv().unwrap(), Frame::Clear);
        assert_eq!(rx.try_recv().unwrap(), Frame::Closed(CloseReason::CommandFinished));
    }
}
