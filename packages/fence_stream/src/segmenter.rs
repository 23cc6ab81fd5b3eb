use serde::Serialize;

const BACKTICK: char = '`';

/// Where the segmenter is relative to a fenced code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceMode {
    /// Outside any fence
    Closed,
    /// After an opening fence, reading the language tag up to a space or newline
    LanguageDescriptor,
    /// Inside a fenced block
    Open,
}

/// Incrementally picks the contents of fenced code blocks out of streamed
/// text.
///
/// Characters are classified one at a time, so the output is the same however
/// the stream is split into chunks. Backticks inside a block are held back
/// until the next character shows whether they are content or the closing
/// fence. Text outside fences is tracked only for fence detection and never
/// emitted.
#[derive(Debug, Clone)]
pub struct StreamSegmenter {
    mode: FenceMode,
    pending_backticks: usize,
    full_text_len: usize,
    /// The last two characters of the full text, oldest first.
    tail: [Option<char>; 2],
}

impl Default for StreamSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSegmenter {
    pub fn new() -> Self {
        Self {
            mode: FenceMode::Closed,
            pending_backticks: 0,
            full_text_len: 0,
            tail: [None, None],
        }
    }

    /// Feed the next chunk; returns the text confirmed to be block content.
    pub fn consume(&mut self, chunk: &str) -> String {
        let mut emitted = String::new();
        for ch in chunk.chars() {
            self.step(ch, &mut emitted);
            self.tail = [self.tail[1], Some(ch)];
            self.full_text_len += 1;
        }
        emitted
    }

    /// Forget everything, ready for the next stream.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn mode(&self) -> FenceMode {
        self.mode
    }

    pub fn pending_backticks(&self) -> usize {
        self.pending_backticks
    }

    /// Characters consumed since the last reset.
    pub fn full_text_len(&self) -> usize {
        self.full_text_len
    }

    fn follows_two_backticks(&self) -> bool {
        self.tail == [Some(BACKTICK), Some(BACKTICK)]
    }

    fn step(&mut self, ch: char, emitted: &mut String) {
        match self.mode {
            FenceMode::Closed => {
                if ch == BACKTICK && self.follows_two_backticks() {
                    self.mode = FenceMode::LanguageDescriptor;
                }
            }
            FenceMode::LanguageDescriptor => {
                if ch == ' ' || ch == '\n' {
                    self.mode = FenceMode::Open;
                    self.pending_backticks = 0;
                }
            }
            FenceMode::Open => {
                if ch == BACKTICK {
                    if self.follows_two_backticks() {
                        self.mode = FenceMode::Closed;
                        self.pending_backticks = 0;
                    } else {
                        self.pending_backticks += 1;
                    }
                } else {
                    emitted.extend(std::iter::repeat_n(BACKTICK, self.pending_backticks));
                    emitted.push(ch);
                    self.pending_backticks = 0;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(chunks: &[&str]) -> String {
        let mut segmenter = StreamSegmenter::new();
        chunks.iter().map(|c| segmenter.consume(c)).collect()
    }

    fn open_block() -> StreamSegmenter {
        let mut segmenter = StreamSegmenter::new();
        assert_eq!(segmenter.consume("```js\n"), "");
        assert_eq!(segmenter.mode(), FenceMode::Open);
        segmenter
    }

    #[test]
    fn emits_only_block_contents() {
        assert_eq!(
            feed(&["Here you go:\n```js\nconsole.log(1)\n```\nDone."]),
            "console.log(1)\n"
        );
    }

    #[test]
    fn fence_split_across_chunks() {
        let whole = "```js\nconsole.log(1)\n```";
        let split = ["``", "`js\n", "console.log(1)\n", "``", "`"];
        assert_eq!(feed(&split), "console.log(1)\n");
        assert_eq!(feed(&[whole]), feed(&split));
    }

    #[test]
    fn every_split_point_gives_same_output() {
        let text = "intro ``x`` ```rust fn a() { `b` }\n``c```tail```py\nz``` end";
        let expected = feed(&[text]);
        let chars: Vec<char> = text.chars().collect();
        for i in 0..=chars.len() {
            for j in i..=chars.len() {
                let a: String = chars[..i].iter().collect();
                let b: String = chars[i..j].iter().collect();
                let c: String = chars[j..].iter().collect();
                assert_eq!(feed(&[&a, &b, &c]), expected, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn single_char_chunks_match_whole() {
        let text = "```\nlet s = `tpl`;\n```";
        let chunks: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(feed(&refs), feed(&[text]));
        assert_eq!(feed(&[text]), "let s = `tpl`;\n");
    }

    #[test]
    fn single_backticks_inside_block_are_kept() {
        let mut segmenter = open_block();
        assert_eq!(segmenter.consume("`a`"), "`a");
        assert_eq!(segmenter.pending_backticks(), 1);
        assert_eq!(segmenter.consume(" "), "` ");
        assert_eq!(segmenter.pending_backticks(), 0);
    }

    #[test]
    fn backtick_then_content_flushes() {
        let mut segmenter = open_block();
        assert_eq!(segmenter.consume("`a`b"), "`a`b");
    }

    #[test]
    fn double_backtick_is_literal_when_followed_by_content() {
        let mut segmenter = open_block();
        assert_eq!(segmenter.consume("``"), "");
        assert_eq!(segmenter.pending_backticks(), 2);
        assert_eq!(segmenter.consume("x"), "``x");
    }

    #[test]
    fn closing_fence_takes_precedence() {
        let mut segmenter = open_block();
        assert_eq!(segmenter.consume("abc```"), "abc");
        assert_eq!(segmenter.mode(), FenceMode::Closed);
        assert_eq!(segmenter.pending_backticks(), 0);
    }

    #[test]
    fn language_descriptor_ends_at_space() {
        let mut segmenter = StreamSegmenter::new();
        segmenter.consume("```python");
        assert_eq!(segmenter.mode(), FenceMode::LanguageDescriptor);
        assert_eq!(segmenter.consume(" print(1)```"), "print(1)");
    }

    #[test]
    fn text_after_closing_fence_is_not_emitted() {
        assert_eq!(feed(&["```\na\n```\nafter"]), "a\n");
    }

    #[test]
    fn multiple_blocks() {
        assert_eq!(
            feed(&["```js\none\n```\nbetween\n```py\ntwo\n```"]),
            "one\ntwo\n"
        );
    }

    #[test]
    fn unicode_content() {
        assert_eq!(feed(&["```\nλ → ü 🦀\n```"]), "λ → ü 🦀\n");
    }

    #[test]
    fn reset_clears_state() {
        let mut segmenter = open_block();
        segmenter.consume("x``");
        assert!(segmenter.full_text_len() > 0);
        segmenter.reset();
        assert_eq!(segmenter.mode(), FenceMode::Closed);
        assert_eq!(segmenter.pending_backticks(), 0);
        assert_eq!(segmenter.full_text_len(), 0);
    }

    #[test]
    fn reset_makes_runs_repeatable() {
        let input = "```js\nlet a = `b`;\n```";
        let mut segmenter = StreamSegmenter::new();
        let first = segmenter.consume(input);
        segmenter.reset();
        let second = segmenter.consume(input);
        assert_eq!(first, second);
        assert_eq!(first, "let a = `b`;\n");
    }

    #[test]
    fn without_reset_tail_carries_over() {
        // Two backticks at the end of one stream can complete a fence with
        // the first backtick of the next one unless the segmenter is reset.
        let mut segmenter = StreamSegmenter::new();
        segmenter.consume("``");
        segmenter.consume("`\n");
        assert_eq!(segmenter.mode(), FenceMode::Open);

        let mut fresh = StreamSegmenter::new();
        fresh.consume("``");
        fresh.reset();
        fresh.consume("`\n");
        assert_eq!(fresh.mode(), FenceMode::Closed);
    }

    #[test]
    fn full_text_len_counts_chars() {
        let mut segmenter = StreamSegmenter::new();
        segmenter.consume("ab");
        segmenter.consume("🦀");
        assert_eq!(segmenter.full_text_len(), 3);
    }

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&FenceMode::LanguageDescriptor).unwrap(),
            "\"language_descriptor\""
        );
    }
}
