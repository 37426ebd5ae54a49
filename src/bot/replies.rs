//! Respuestas en texto plano para los comandos.

use std::fmt::Write;

use crate::audio::{
    player::{AddOutcome, PlayerSnapshot, PlayerState},
    track::{format_playback_time, TrackMetadata},
    volume::{as_percentage, VolumeInput},
};

/// Máximo de entradas listadas por `/queue`
const QUEUE_WINDOW: usize = 15;

fn duration_label(track: &TrackMetadata) -> String {
    match track.duration_hint {
        Some(duration) => format_playback_time(duration),
        None => "🔴 En vivo".to_string(),
    }
}

pub fn now_playing(track: &TrackMetadata) -> String {
    format!("▶️ **{}** [{}]", track.title, duration_label(track))
}

pub fn track_added(track: &TrackMetadata, outcome: &AddOutcome) -> String {
    match &outcome.started {
        Some(started) if started.id == track.id => now_playing(track),
        Some(started) => format!(
            "✅ **{}** agregada en la posición {}\n{}",
            track.title,
            outcome.at + 1,
            now_playing(started)
        ),
        None => format!("✅ **{}** agregada en la posición {}", track.title, outcome.at + 1),
    }
}

pub fn skipped(track: Option<&TrackMetadata>, forward: bool) -> String {
    match (track, forward) {
        (Some(track), true) => format!("⏭️ **{}**", track.title),
        (Some(track), false) => format!("⏮️ **{}**", track.title),
        (None, _) => "⏹️ No hay otra canción para reproducir".to_string(),
    }
}

pub fn volume_set(input: VolumeInput, applied: f32) -> String {
    format!("🔊 Volumen ajustado a {}% ({})", as_percentage(applied), input)
}

/// Lista la cola alrededor del cursor
pub fn queue(snapshot: &PlayerSnapshot) -> String {
    if snapshot.tracks.is_empty() {
        return "📭 La cola está vacía".to_string();
    }

    let mut out = format!(
        "🎶 Cola ({}) · {} · {} · 🔊 {}%\n",
        snapshot.tracks.len(),
        snapshot.mode,
        snapshot.state,
        as_percentage(snapshot.volume)
    );

    let start = snapshot.cursor.saturating_sub(2);
    let end = (start + QUEUE_WINDOW).min(snapshot.tracks.len());
    if start > 0 {
        let _ = writeln!(out, "… {} antes", start);
    }

    for (index, track) in snapshot.tracks.iter().enumerate().take(end).skip(start) {
        let marker = if index == snapshot.cursor { "▶️" } else { "  " };
        let _ = writeln!(
            out,
            "{} {}. {} [{}]",
            marker,
            index + 1,
            track.title,
            duration_label(track)
        );
    }

    if end < snapshot.tracks.len() {
        let _ = writeln!(out, "… y {} más", snapshot.tracks.len() - end);
    }

    if let (Some(track), Some(position)) = (&snapshot.now_playing, snapshot.position) {
        if snapshot.state != PlayerState::Idle {
            let _ = write!(
                out,
                "⏱️ {} / {} · 👤 <@{}> {} UTC",
                format_playback_time(position),
                duration_label(track),
                track.requested_by,
                track.added_at.format("%H:%M")
            );
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{repeat::RepeatMode, volume::VolumeUnit},
        sources::{SourceKind, TrackSource},
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::time::Duration;

    fn meta(title: &str, secs: Option<u64>) -> TrackMetadata {
        TrackMetadata::new(
            TrackSource::new(SourceKind::DirectUrl, format!("https://x/{title}.mp3")),
            title,
            UserId::new(1),
        )
        .with_duration(secs.map(Duration::from_secs))
    }

    fn snapshot(count: usize, cursor: usize) -> PlayerSnapshot {
        let added_at = Utc.with_ymd_and_hms(2024, 3, 9, 18, 30, 0).unwrap();
        let tracks: Vec<TrackMetadata> = (0..count)
            .map(|i| TrackMetadata {
                added_at,
                ..meta(&format!("t{i}"), Some(60))
            })
            .collect();
        PlayerSnapshot {
            now_playing: tracks.get(cursor).cloned(),
            tracks,
            cursor,
            state: PlayerState::Playing,
            mode: RepeatMode::RepeatQueue,
            volume: 0.5,
            position: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_empty_queue() {
        assert_eq!(queue(&snapshot(0, 0)), "📭 La cola está vacía");
    }

    #[test]
    fn test_queue_marks_cursor_and_position() {
        let text = queue(&snapshot(3, 1));
        assert_eq!(
            text,
            "🎶 Cola (3) · Repeat Queue · reproduciendo · 🔊 50%\n   \
             1. t0 [1:00]\n\
             ▶️ 2. t1 [1:00]\n   \
             3. t2 [1:00]\n\
             ⏱️ 0:05 / 1:00 · 👤 <@1> 18:30 UTC"
        );
    }

    #[test]
    fn test_long_queue_is_windowed() {
        let text = queue(&snapshot(40, 10));
        assert!(text.contains("… 8 antes"));
        assert!(text.contains("▶️ 11. t10"));
        assert!(text.contains("… y 17 más"));
        assert!(!text.contains(" 24. "));
    }

    #[test]
    fn test_track_added_messages() {
        let track = meta("song", None);
        let started_self = AddOutcome {
            added: 1,
            at: 0,
            started: Some(track.clone()),
        };
        assert_eq!(track_added(&track, &started_self), "▶️ **song** [🔴 En vivo]");

        let queued = AddOutcome {
            added: 1,
            at: 4,
            started: None,
        };
        assert_eq!(track_added(&track, &queued), "✅ **song** agregada en la posición 5");
    }

    #[test]
    fn test_volume_and_skip_messages() {
        assert_eq!(
            volume_set(VolumeInput::new(40.0, VolumeUnit::Decibels), 1.0),
            "🔊 Volumen ajustado a 100% (40dB)"
        );
        assert_eq!(skipped(None, true), "⏹️ No hay otra canción para reproducir");
    }
}
