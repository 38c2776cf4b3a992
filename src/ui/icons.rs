//! Icons shared by the terminal output.

use console::Emoji;

// Phase outcomes
pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274c} ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("\u{23ed}\u{fe0f}  ", "[SKIP]");

// Run lifecycle
pub static BUG: Emoji<'_, '_> = Emoji("\u{1f41b} ", "[HUNT]");
pub static RESUME: Emoji<'_, '_> = Emoji("\u{1f504} ", "[RESUME]");
pub static STALL: Emoji<'_, '_> = Emoji("\u{1f6a7} ", "[STALL]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("\u{2728} ", "*");
