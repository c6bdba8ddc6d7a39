use regex::Regex;

use crate::errors::ParseError;

lazy_static! {
    static ref SPRITE_FILENAME_PATTERN: Regex =
        Regex::new(r"^16px-(?P<charname>.+?)\.png").expect("sprite pattern compiles");
}

/// Maps a sprite image source to the character it depicts.
///
/// Only the last path segment is inspected, so both
/// `/images/thumb/4/4c/Fox.png/16px-Fox.png` and `16px-Fox.png` give `Fox`.
pub fn character_from_sprite(src: &str) -> Result<String, ParseError> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let filename = path.rsplit('/').next().unwrap_or(path);
    SPRITE_FILENAME_PATTERN
        .captures(filename)
        .and_then(|c| c.name("charname"))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ParseError::SpriteFilename(src.to_string()))
}
