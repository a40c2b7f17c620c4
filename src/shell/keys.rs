//! Byte encodings for keys the terminal cannot send as text

pub const BACKSPACE: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrow {
    Up,
    Down,
    Right,
    Left,
}

impl Arrow {
    pub fn sequence(self) -> &'static [u8] {
        match self {
            Arrow::Up => b"\x1b[A",
            Arrow::Down => b"\x1b[B",
            Arrow::Right => b"\x1b[C",
            Arrow::Left => b"\x1b[D",
        }
    }
}

/// Control+`c` for an ASCII `c`
pub fn control_byte(c: char) -> Option<u8> {
    c.is_ascii().then(|| (c as u8) & 0x1f)
}
