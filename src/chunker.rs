//! Smart message chunker
//!
//! Groups a chat's message stream into context-rich chunks: consecutive
//! short messages from one author merge into a story, replies stand alone,
//! quick cross-author exchanges get question/answer tags so both halves of
//! an implicit Q/A are findable together.

use std::collections::{HashSet, VecDeque};

use chrono::Duration;

use crate::config::Config;
use crate::models::{Chat, Chunk, ChunkMetadata, LikelyAnswer, RawMessage};

/// Short confirmations/denials that mark a chunk as an answer on their own.
const ANSWER_TOKENS: &[&str] = &[
    "yes", "no", "yeah", "nope", "yep", "done", "fixed", "completed", "confirmed", "negative",
    "not yet", "will do",
];

/// How many preceding messages to scan when resolving reply parents and
/// likely questions.
const LOOKBACK_MESSAGES: usize = 200;

/// Replies shorter than this get the parent text woven into the chunk so
/// the exchange reads as one unit.
const SHORT_REPLY_WEAVE_CHARS: usize = 50;

/// Rolling window for counting active authors.
const BUSY_ACTIVITY_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size_chars: usize,
    pub chunk_overlap_chars: usize,
    /// Appending past this total flushes the current group
    pub group_text_limit_chars: usize,
    pub group_time_window: Duration,
    pub busy_time_window: Duration,
    pub busy_author_threshold: usize,
    pub busy_activity_window: Duration,
    pub likely_answer_window: Duration,
    pub short_answer_window: Duration,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: 500,
            chunk_overlap_chars: 100,
            group_text_limit_chars: 400,
            group_time_window: Duration::seconds(120),
            busy_time_window: Duration::seconds(30),
            busy_author_threshold: 5,
            busy_activity_window: Duration::seconds(BUSY_ACTIVITY_WINDOW_SECS),
            likely_answer_window: Duration::seconds(30),
            short_answer_window: Duration::seconds(60),
        }
    }
}

impl From<&Config> for ChunkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size_chars: config.chunk_size_chars,
            chunk_overlap_chars: config.chunk_overlap_chars,
            group_text_limit_chars: config.group_text_limit_chars,
            group_time_window: Duration::seconds(config.group_time_window_seconds),
            busy_time_window: Duration::seconds(config.busy_chat_time_window_seconds),
            busy_author_threshold: config.busy_chat_author_threshold,
            busy_activity_window: Duration::seconds(BUSY_ACTIVITY_WINDOW_SECS),
            likely_answer_window: Duration::seconds(config.likely_answer_window_seconds),
            short_answer_window: Duration::seconds(config.short_answer_window_seconds),
        }
    }
}

/// The most recently emitted group; used for short-answer inference.
struct FlushedGroup {
    sender_id: i64,
    end_date: chrono::DateTime<chrono::Utc>,
    ended_with_question: bool,
}

#[derive(Debug, Clone)]
pub struct SmartChunker {
    config: ChunkerConfig,
}

impl SmartChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk one chat's messages, which must arrive in fetch order.
    ///
    /// Messages are never reordered; an out-of-order timestamp starts a
    /// fresh group. Empty-text (media-only) messages are skipped but still
    /// count as chat activity for the busy heuristic.
    pub fn chunk_messages(&self, chat: &Chat, messages: &[RawMessage]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut group: Vec<usize> = Vec::new();
        let mut group_len = 0usize;
        let mut recent: VecDeque<(chrono::DateTime<chrono::Utc>, i64)> = VecDeque::new();
        let mut last_flushed: Option<FlushedGroup> = None;

        for (idx, m) in messages.iter().enumerate() {
            recent.push_back((m.date, m.sender_id));
            while let Some(&(ts, _)) = recent.front() {
                if m.date - ts > self.config.busy_activity_window {
                    recent.pop_front();
                } else {
                    break;
                }
            }

            if m.text.trim().is_empty() {
                continue;
            }

            if m.reply_to_msg_id.is_some() {
                // A reply always stands alone, even mid-run.
                self.flush_group(chat, messages, &mut group, &mut group_len, &mut last_flushed, &mut chunks);
                self.emit_reply(chat, messages, idx, &mut last_flushed, &mut chunks);
                continue;
            }

            if let Some(&last_idx) = group.last() {
                let last = &messages[last_idx];
                let authors: HashSet<i64> = recent.iter().map(|&(_, s)| s).collect();
                let window = if authors.len() >= self.config.busy_author_threshold {
                    self.config.busy_time_window
                } else {
                    self.config.group_time_window
                };

                let break_group = m.sender_id != last.sender_id
                    || m.date < last.date
                    || m.date - last.date > window
                    || group_len + 1 + m.text.chars().count() > self.config.group_text_limit_chars;

                if break_group {
                    self.flush_group(chat, messages, &mut group, &mut group_len, &mut last_flushed, &mut chunks);
                }
            }

            if group_len > 0 {
                group_len += 1; // joining space
            }
            group_len += m.text.chars().count();
            group.push(idx);
        }

        self.flush_group(chat, messages, &mut group, &mut group_len, &mut last_flushed, &mut chunks);
        chunks
    }

    fn flush_group(
        &self,
        chat: &Chat,
        messages: &[RawMessage],
        group: &mut Vec<usize>,
        group_len: &mut usize,
        last_flushed: &mut Option<FlushedGroup>,
        chunks: &mut Vec<Chunk>,
    ) {
        if group.is_empty() {
            return;
        }
        let indices = std::mem::take(group);
        *group_len = 0;

        let first = &messages[indices[0]];
        let last = &messages[*indices.last().unwrap()];
        let text = indices
            .iter()
            .map(|&i| messages[i].text.trim())
            .collect::<Vec<_>>()
            .join(" ");

        let is_question = text.trim_end().ends_with('?');
        let likely_answer_to = self.find_likely_question(messages, indices[0]);
        // A group inferred to follow a question is an answer by definition.
        let is_answer = self.classify_answer(&text, first, last_flushed.as_ref())
            || likely_answer_to.is_some();

        let metadata = ChunkMetadata {
            timestamp: first.date,
            chat_title: chat.title.clone(),
            chat_id: first.chat_id,
            msg_id: first.msg_id,
            sender_name: first.sender_name.clone(),
            sender_username: first.sender_username.clone(),
            full_text: text.clone(),
            message_count: indices.len(),
            reply_to_msg_id: None,
            reply_to_text: None,
            reply_to_sender: None,
            likely_answer_to,
            is_question,
            is_answer,
            chunk_index: 0,
            chunk_total: 1,
        };

        self.emit_chunks(text, metadata, chunks);

        *last_flushed = Some(FlushedGroup {
            sender_id: first.sender_id,
            end_date: last.date,
            ended_with_question: is_question,
        });
    }

    fn emit_reply(
        &self,
        chat: &Chat,
        messages: &[RawMessage],
        idx: usize,
        last_flushed: &mut Option<FlushedGroup>,
        chunks: &mut Vec<Chunk>,
    ) {
        let m = &messages[idx];
        let reply_to = m.reply_to_msg_id.expect("emit_reply called on non-reply");
        let parent = messages[idx.saturating_sub(LOOKBACK_MESSAGES)..idx]
            .iter()
            .rev()
            .find(|p| p.msg_id == reply_to && p.chat_id == m.chat_id);

        let mut text = m.text.trim().to_string();
        if let Some(parent) = parent {
            if text.chars().count() < SHORT_REPLY_WEAVE_CHARS && !parent.text.trim().is_empty() {
                let parent_preview: String = parent.text.trim().chars().take(100).collect();
                text = format!("{} replied '{}' to '{}'", m.sender_name, text, parent_preview);
            }
        }

        let is_question = text.trim_end().ends_with('?');
        let is_answer = self.classify_answer(m.text.trim(), m, last_flushed.as_ref());

        let metadata = ChunkMetadata {
            timestamp: m.date,
            chat_title: chat.title.clone(),
            chat_id: m.chat_id,
            msg_id: m.msg_id,
            sender_name: m.sender_name.clone(),
            sender_username: m.sender_username.clone(),
            full_text: m.text.trim().to_string(),
            message_count: 1,
            reply_to_msg_id: Some(reply_to),
            reply_to_text: parent.map(|p| p.text.clone()),
            reply_to_sender: parent.map(|p| p.sender_name.clone()),
            likely_answer_to: None,
            is_question,
            is_answer,
            chunk_index: 0,
            chunk_total: 1,
        };

        self.emit_chunks(text, metadata, chunks);

        *last_flushed = Some(FlushedGroup {
            sender_id: m.sender_id,
            end_date: m.date,
            ended_with_question: is_question,
        });
    }

    /// Split group text into one or more chunks and push them.
    fn emit_chunks(&self, text: String, metadata: ChunkMetadata, chunks: &mut Vec<Chunk>) {
        let parts = split_text(
            &text,
            self.config.chunk_size_chars,
            self.config.chunk_overlap_chars,
        );
        let total = parts.len() as u32;
        for (i, part) in parts.into_iter().enumerate() {
            let mut meta = metadata.clone();
            meta.chunk_index = i as u32;
            meta.chunk_total = total;
            chunks.push(Chunk {
                chat_id: meta.chat_id,
                msg_id: meta.msg_id,
                chunk_index: i as u32,
                text: part,
                metadata: meta,
            });
        }
    }

    fn classify_answer(
        &self,
        text: &str,
        first: &RawMessage,
        last_flushed: Option<&FlushedGroup>,
    ) -> bool {
        let lower = text.trim().to_lowercase();
        if ANSWER_TOKENS.contains(&lower.as_str()) {
            return true;
        }
        if lower.split_whitespace().count() <= 4 {
            if let Some(prev) = last_flushed {
                let gap = first.date - prev.end_date;
                if prev.ended_with_question
                    && prev.sender_id != first.sender_id
                    && gap >= Duration::zero()
                    && gap <= self.config.short_answer_window
                {
                    return true;
                }
            }
        }
        false
    }

    /// Look back for a question from another author the group's first
    /// message arrived quickly after.
    fn find_likely_question(&self, messages: &[RawMessage], first_idx: usize) -> Option<LikelyAnswer> {
        let first = &messages[first_idx];
        let start = first_idx.saturating_sub(LOOKBACK_MESSAGES);
        for prev in messages[start..first_idx].iter().rev() {
            if prev.date > first.date {
                continue; // out-of-order fetch, not a preceding message
            }
            if first.date - prev.date > self.config.likely_answer_window {
                break;
            }
            if prev.sender_id != first.sender_id && prev.text.trim().ends_with('?') {
                return Some(LikelyAnswer {
                    msg_id: prev.msg_id,
                    text: prev.text.trim().chars().take(100).collect(),
                    sender_name: prev.sender_name.clone(),
                });
            }
        }
        None
    }
}

/// Split text at sentence boundaries into windows of at most `size` chars,
/// seeding each subsequent window with up to `overlap` trailing chars of
/// the previous one. A window may exceed `size` by at most the seed length.
fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.chars().count() <= size {
        return vec![text.to_string()];
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut seed_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > size {
            if !current.trim().is_empty() {
                parts.push(current.trim().to_string());
            }
            hard_split(&sentence, size, overlap, &mut parts);
            current = char_tail(parts.last().unwrap(), overlap);
            seed_len = current.chars().count();
            continue;
        }

        let current_len = current.chars().count();
        if current_len > 0 && current_len + 1 + sentence_len > size + seed_len {
            let finished = current.trim().to_string();
            if finished.chars().count() > seed_len {
                current = char_tail(&finished, overlap);
                seed_len = current.chars().count();
                parts.push(finished);
            } else {
                // Window holds only the overlap seed; replace instead of
                // emitting duplicate text.
                current = String::new();
                seed_len = 0;
            }
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }

    let trimmed = current.trim();
    // The trailing window is dropped if it only repeats the overlap seed.
    if !trimmed.is_empty() && trimmed.chars().count() > seed_len {
        parts.push(trimmed.to_string());
    }

    parts.retain(|p| !p.is_empty());
    parts
}

/// Character-window split for a single run-on sentence.
fn hard_split(sentence: &str, size: usize, overlap: usize, parts: &mut Vec<String>) {
    let chars: Vec<char> = sentence.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut i = 0;
    while i < chars.len() {
        let end = (i + size).min(chars.len());
        let piece: String = chars[i..end].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            parts.push(piece);
        }
        if end == chars.len() {
            break;
        }
        i += step;
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for c in text.chars() {
        cur.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let trimmed = cur.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            cur.clear();
        }
    }
    let trimmed = cur.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
    out
}

/// Last `n` chars of `text`, snapped to the start of a word.
fn char_tail(text: &str, n: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= n {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - n..].iter().collect();
    match tail.find(' ') {
        Some(pos) => tail[pos + 1..].to_string(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::models::ChatKind;

    fn chat() -> Chat {
        Chat::new(-1001000, "Site Ops", ChatKind::Supergroup)
    }

    fn msg(msg_id: i64, sender_id: i64, sender: &str, hms: (u32, u32, u32), text: &str) -> RawMessage {
        RawMessage {
            chat_id: -1001000,
            msg_id,
            sender_id,
            sender_name: sender.to_string(),
            sender_username: None,
            date: Utc.with_ymd_and_hms(2023, 1, 7, hms.0, hms.1, hms.2).unwrap(),
            text: text.to_string(),
            reply_to_msg_id: None,
        }
    }

    fn reply(msg_id: i64, sender_id: i64, sender: &str, hms: (u32, u32, u32), text: &str, to: i64) -> RawMessage {
        RawMessage {
            reply_to_msg_id: Some(to),
            ..msg(msg_id, sender_id, sender, hms, text)
        }
    }

    fn chunker() -> SmartChunker {
        SmartChunker::new(ChunkerConfig::default())
    }

    #[test]
    fn grouped_story_with_interrupting_reply() {
        let messages = vec![
            msg(1001, 7, "Colin", (10, 1, 0), "and so i told him he doesnt know"),
            msg(1002, 7, "Colin", (10, 1, 5), "what's really happening here"),
            reply(1003, 7, "Colin", (10, 1, 10), "No haven't checked", 900),
            msg(1004, 7, "Colin", (10, 2, 0), "but I'll do it after lunch"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);

        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0].text,
            "and so i told him he doesnt know what's really happening here"
        );
        assert_eq!(chunks[0].metadata.message_count, 2);
        assert_eq!(chunks[0].msg_id, 1001);

        assert_eq!(chunks[1].metadata.reply_to_msg_id, Some(900));
        assert_eq!(chunks[1].metadata.message_count, 1);
        // Parent 900 was never fetched: text stays raw, reply ref retained
        assert_eq!(chunks[1].text, "No haven't checked");
        assert!(chunks[1].metadata.reply_to_text.is_none());

        assert_eq!(chunks[2].msg_id, 1004);
        assert_eq!(chunks[2].metadata.message_count, 1);
    }

    #[test]
    fn implicit_question_answer_pair() {
        let messages = vec![
            msg(2000, 1, "John", (12, 0, 0), "Did you fix pump 5?"),
            msg(2001, 7, "Colin", (12, 0, 5), "yes"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].metadata.is_question);
        assert!(!chunks[0].metadata.is_answer);

        assert!(chunks[1].metadata.is_answer);
        let likely = chunks[1].metadata.likely_answer_to.as_ref().unwrap();
        assert_eq!(likely.msg_id, 2000);
        assert_eq!(likely.sender_name, "John");
    }

    #[test]
    fn busy_chat_tightens_cohesion_window() {
        // Five other authors chatter inside the rolling window, then one
        // author sends two messages 90 s apart.
        let mut messages: Vec<RawMessage> = (0..5)
            .map(|i| {
                msg(
                    100 + i,
                    10 + i,
                    &format!("User{i}"),
                    (9, 0, (i * 10) as u32),
                    "chatter",
                )
            })
            .collect();
        messages.push(msg(200, 99, "Colin", (9, 2, 0), "first half of a story"));
        messages.push(msg(201, 99, "Colin", (9, 3, 30), "second half of it"));

        let chunks = chunker().chunk_messages(&chat(), &messages);
        let colin: Vec<&Chunk> = chunks.iter().filter(|c| c.metadata.sender_name == "Colin").collect();
        assert_eq!(colin.len(), 2, "busy chat must not merge 90s-apart messages");
    }

    #[test]
    fn quiet_chat_groups_within_two_minutes() {
        let messages = vec![
            msg(200, 99, "Colin", (9, 2, 0), "first half of a story"),
            msg(201, 99, "Colin", (9, 3, 30), "second half of it"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.message_count, 2);
    }

    #[test]
    fn author_change_breaks_group() {
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), "checking the valves now"),
            msg(2, 2, "Colin", (8, 0, 10), "roger that"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn group_text_limit_breaks_group() {
        let long_a = "a".repeat(250);
        let long_b = "b".repeat(250);
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), &long_a),
            msg(2, 1, "John", (8, 0, 5), &long_b),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn out_of_order_message_starts_fresh_group() {
        let messages = vec![
            msg(10, 1, "John", (8, 5, 0), "later message"),
            msg(9, 1, "John", (8, 4, 0), "earlier message arrived late"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 2);
        // order of input preserved, never re-sorted
        assert_eq!(chunks[0].msg_id, 10);
        assert_eq!(chunks[1].msg_id, 9);
    }

    #[test]
    fn media_only_messages_are_skipped() {
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), "look at this"),
            msg(2, 1, "John", (8, 0, 5), "   "),
            msg(3, 1, "John", (8, 0, 10), "impressive right?"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.message_count, 2);
    }

    #[test]
    fn short_reply_weaves_parent_context() {
        let messages = vec![
            msg(50, 1, "John", (8, 0, 0), "Is the crane booked for Monday?"),
            reply(51, 2, "Colin", (8, 0, 20), "yes all sorted", 50),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[1].text,
            "Colin replied 'yes all sorted' to 'Is the crane booked for Monday?'"
        );
        assert_eq!(chunks[1].metadata.reply_to_sender.as_deref(), Some("John"));
        assert_eq!(
            chunks[1].metadata.reply_to_text.as_deref(),
            Some("Is the crane booked for Monday?")
        );
        // full_text keeps the raw message
        assert_eq!(chunks[1].metadata.full_text, "yes all sorted");
    }

    #[test]
    fn long_reply_keeps_own_text() {
        let long_reply_text = "I checked with the supplier this morning and they confirmed the booking for Monday at eight";
        let messages = vec![
            msg(50, 1, "John", (8, 0, 0), "Is the crane booked for Monday?"),
            reply(51, 2, "Colin", (8, 0, 20), long_reply_text, 50),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks[1].text, long_reply_text);
    }

    #[test]
    fn single_short_message_is_single_chunk() {
        let messages = vec![msg(1, 1, "John", (8, 0, 0), "short note")];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].metadata.chunk_total, 1);
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        let chunks = chunker().chunk_messages(&chat(), &[]);
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversized_group_splits_with_shared_metadata() {
        let sentences: Vec<String> = (0..20)
            .map(|i| format!("Sentence number {i} describing the ongoing generator saga."))
            .collect();
        let text = sentences.join(" ");
        let messages = vec![msg(1, 1, "John", (8, 0, 0), &text)];

        let config = ChunkerConfig::default();
        let chunks = chunker().chunk_messages(&chat(), &messages);

        assert!(chunks.len() > 1);
        let total = chunks.len() as u32;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i as u32);
            assert_eq!(chunk.metadata.chunk_total, total);
            assert_eq!(chunk.msg_id, 1);
            assert_eq!(chunk.metadata.full_text, text.trim());
            assert!(
                chunk.text.chars().count()
                    <= config.chunk_size_chars + config.chunk_overlap_chars,
                "chunk exceeds size + overlap slack"
            );
        }
    }

    #[test]
    fn split_text_short_input_untouched() {
        let parts = split_text("hello world.", 500, 100);
        assert_eq!(parts, vec!["hello world.".to_string()]);
    }

    #[test]
    fn split_text_overlaps_adjacent_chunks() {
        let text = (0..12)
            .map(|i| format!("Part {i} of the long report goes here."))
            .collect::<Vec<_>>()
            .join(" ");
        let parts = split_text(&text, 120, 40);
        assert!(parts.len() > 1);
        for pair in parts.windows(2) {
            // The next part must open with text already seen at the end of
            // the previous one.
            let opening: String = pair[1].chars().take(10).collect();
            assert!(
                pair[0].contains(opening.trim_end()),
                "no overlap between '{}' and '{}'",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn split_text_handles_run_on_sentence() {
        let text = "x".repeat(1200);
        let parts = split_text(&text, 500, 100);
        assert!(parts.len() >= 3);
        for part in &parts {
            assert!(part.chars().count() <= 600);
        }
    }

    #[test]
    fn answer_token_detection_is_case_insensitive() {
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), "Done?"),
            msg(2, 2, "Colin", (8, 0, 10), "YES"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert!(chunks[1].metadata.is_answer);
    }

    #[test]
    fn short_followup_after_question_counts_as_answer() {
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), "Who is on site today?"),
            msg(2, 2, "Colin", (8, 0, 30), "just me and Dave"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert!(chunks[1].metadata.is_answer);
    }

    #[test]
    fn slow_followup_is_not_an_answer() {
        let messages = vec![
            msg(1, 1, "John", (8, 0, 0), "Who is on site today?"),
            msg(2, 2, "Colin", (8, 5, 0), "just me and Dave"),
        ];
        let chunks = chunker().chunk_messages(&chat(), &messages);
        assert!(!chunks[1].metadata.is_answer);
        // and too slow for the likely-answer window as well
        assert!(chunks[1].metadata.likely_answer_to.is_none());
    }
}
