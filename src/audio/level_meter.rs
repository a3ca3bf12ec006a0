//! Измеритель уровня: RMS и пик с удержанием
//!
//! `process` вызывается из потока обработки (обычно через
//! [`MeterHandler`](crate::audio::handler::MeterHandler)), а UI или цикл
//! обновления терминала читает уровни из другого потока.
//!
//! Состояние удержания пика защищено мьютексом, который берёт только
//! `process`. Последняя пара (rms, peak) публикуется как два битовых
//! образа `f32`, упакованных в один `AtomicU64`: читатель всегда видит
//! согласованную пару и никогда не ждёт аудио-сторону.
//!
//! ## Удержание пика
//!
//! Новый максимум фиксирует пик и заново заряжает бюджет удержания.
//! Более тихие кадры расходуют бюджет по числу отсчётов на канал (то есть
//! по времени). Когда бюджет исчерпан, следующий тихий кадр сразу заменяет
//! удерживаемый пик своим максимумом. Плавного затухания нет.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::constants::{DEFAULT_PEAK_HOLD_SECS, DEFAULT_SAMPLE_RATE, LEVEL_EPSILON, MIN_DB};

/// Окно, по которому считается RMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RmsWindow {
    /// Только кадр, переданный в текущий вызов `process`
    #[default]
    PerFrame,
    /// Последние `n` отсчётов (всех каналов), через границы кадров
    Samples(usize),
}

/// Параметры измерителя уровня
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterParams {
    pub window: RmsWindow,

    /// Время удержания пика в секундах
    pub peak_hold_secs: f64,

    pub sample_rate: u32,
}

impl Default for MeterParams {
    fn default() -> Self {
        Self {
            window: RmsWindow::PerFrame,
            peak_hold_secs: DEFAULT_PEAK_HOLD_SECS,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl MeterParams {
    /// Бюджет удержания в отсчётах на канал (с отбрасыванием дробной части)
    pub fn hold_samples(&self) -> usize {
        (self.peak_hold_secs.max(0.0) * self.sample_rate as f64) as usize
    }
}

/// Изменяемое состояние, которого касается только `process`
#[derive(Debug, Default)]
struct MeterState {
    current_peak: f32,
    hold_remaining: usize,
    /// Квадраты отсчётов скользящего окна, от старых к новым
    window: VecDeque<f32>,
}

/// Последние вычисленные уровни, упакованные для атомарного доступа
#[derive(Debug, Clone, Copy, PartialEq)]
struct PublishedLevels {
    rms: f32,
    peak: f32,
}

impl PublishedLevels {
    fn pack(self) -> u64 {
        ((self.rms.to_bits() as u64) << 32) | (self.peak.to_bits() as u64)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            rms: f32::from_bits((packed >> 32) as u32),
            peak: f32::from_bits(packed as u32),
        }
    }
}

/// Уровни в децибелах, готовые для отображения
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelSnapshot {
    pub rms_db: f32,
    pub peak_db: f32,
}

/// Измеритель RMS и пика с удержанием
pub struct LevelMeter {
    params: MeterParams,
    hold_samples: usize,
    state: Mutex<MeterState>,
    levels: AtomicU64,
}

impl LevelMeter {
    pub fn new(params: MeterParams) -> Self {
        Self {
            hold_samples: params.hold_samples(),
            params,
            state: Mutex::new(MeterState::default()),
            levels: AtomicU64::new(PublishedLevels { rms: 0.0, peak: 0.0 }.pack()),
        }
    }

    /// Измерить моно-кадр, вернуть линейные (rms, удерживаемый пик)
    pub fn process(&self, samples: &[f32]) -> (f32, f32) {
        self.process_interleaved(samples, 1)
    }

    /// Измерить кадр из `channels` перемежённых каналов
    ///
    /// Пустой кадр не меняет состояние.
    pub fn process_interleaved(&self, samples: &[f32], channels: u16) -> (f32, f32) {
        if samples.is_empty() {
            return self.levels();
        }
        let frames = samples.len() / channels.max(1) as usize;

        let mut state = self.state.lock();

        let rms = match self.params.window {
            RmsWindow::PerFrame => frame_rms(samples),
            RmsWindow::Samples(size) => rolling_rms(&mut state.window, samples, size),
        };

        let frame_peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        if frame_peak > state.current_peak {
            state.current_peak = frame_peak;
            state.hold_remaining = self.hold_samples;
        } else if state.hold_remaining > 0 {
            state.hold_remaining = state.hold_remaining.saturating_sub(frames);
        } else {
            state.current_peak = frame_peak;
        }

        let published = PublishedLevels {
            rms,
            peak: state.current_peak,
        };
        self.levels.store(published.pack(), Ordering::Release);

        (published.rms, published.peak)
    }

    /// Последние линейные (rms, peak)
    pub fn levels(&self) -> (f32, f32) {
        let levels = PublishedLevels::unpack(self.levels.load(Ordering::Acquire));
        (levels.rms, levels.peak)
    }

    /// Последние (rms, peak) в дБ, не ниже -200 дБ
    pub fn levels_db(&self) -> (f32, f32) {
        let (rms, peak) = self.levels();
        (to_db(rms), to_db(peak))
    }

    pub fn snapshot(&self) -> LevelSnapshot {
        let (rms_db, peak_db) = self.levels_db();
        LevelSnapshot { rms_db, peak_db }
    }

    /// Сбросить пик, скользящее окно и опубликованные уровни
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = MeterState::default();
        self.levels
            .store(PublishedLevels { rms: 0.0, peak: 0.0 }.pack(), Ordering::Release);
    }

    pub fn hold_samples(&self) -> usize {
        self.hold_samples
    }

    pub fn params(&self) -> &MeterParams {
        &self.params
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(MeterParams::default())
    }
}

/// Перевод линейного уровня в дБ; никогда не возвращает -inf или NaN
pub fn to_db(level: f32) -> f32 {
    let level = if level.is_nan() { 0.0 } else { level };
    (20.0 * level.max(LEVEL_EPSILON).log10()).max(MIN_DB)
}

/// Положение `db` на шкале `floor_db..=0`, в диапазоне `0.0..=1.0`
pub fn meter_fraction(db: f32, floor_db: f32) -> f32 {
    if floor_db >= 0.0 {
        return if db >= 0.0 { 1.0 } else { 0.0 };
    }
    ((db - floor_db) / -floor_db).clamp(0.0, 1.0)
}

fn frame_rms(samples: &[f32]) -> f32 {
    let sum: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

fn rolling_rms(window: &mut VecDeque<f32>, samples: &[f32], size: usize) -> f32 {
    if size == 0 {
        return frame_rms(samples);
    }

    let skip = samples.len().saturating_sub(size);
    window.extend(samples[skip..].iter().map(|s| s * s));
    while window.len() > size {
        window.pop_front();
    }

    let sum: f64 = window.iter().map(|sq| *sq as f64).sum();
    (sum / window.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold_meter() -> LevelMeter {
        LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            peak_hold_secs: 1.0,
            sample_rate: 44_100,
        })
    }

    #[test]
    fn test_published_levels_pack_unpack() {
        let levels = PublishedLevels { rms: 0.125, peak: 0.75 };
        assert_eq!(PublishedLevels::unpack(levels.pack()), levels);
    }

    #[test]
    fn test_rms_of_constant_frame() {
        let meter = LevelMeter::default();
        let (rms, peak) = meter.process(&[0.5; 1024]);
        assert!((rms - 0.5).abs() < 1e-6);
        assert!((peak - 0.5).abs() < 1e-6);

        let (rms_db, peak_db) = meter.levels_db();
        assert!((rms_db - (-6.0206)).abs() < 1e-3);
        assert!((peak_db - (-6.0206)).abs() < 1e-3);
    }

    #[test]
    fn test_silence_is_floored() {
        let meter = LevelMeter::default();
        assert_eq!(meter.levels_db(), (-200.0, -200.0));

        meter.process(&[0.0; 256]);
        let (rms_db, peak_db) = meter.levels_db();
        assert!(rms_db.is_finite() && peak_db.is_finite());
        assert_eq!(rms_db, -200.0);
        assert_eq!(peak_db, -200.0);
    }

    #[test]
    fn test_to_db_is_always_finite() {
        for level in [0.0, -1.0, f32::NAN, f32::MIN_POSITIVE, 1e-12, 1.0, 4.0] {
            assert!(to_db(level).is_finite(), "level {level}");
        }
        assert_eq!(to_db(1.0), 0.0);
    }

    #[test]
    fn test_hold_samples() {
        assert_eq!(hold_meter().hold_samples(), 44_100);
    }

    #[test]
    fn test_peak_hold_boundary() {
        let meter = hold_meter();
        let loud = [1.0f32; 1024];
        let silent = [0.0f32; 1024];

        assert_eq!(meter.process(&loud).1, 1.0);

        // 43 тихих кадра тратят 44032 из 44100, 44-й тратит оставшиеся 68;
        // пик всё это время удерживается.
        for frame in 1..=44 {
            let (_, peak) = meter.process(&silent);
            assert_eq!(peak, 1.0, "peak released early at quiet frame {frame}");
        }

        // Бюджет исчерпан: следующий тихий кадр сразу заменяет пик.
        assert_eq!(meter.process(&silent).1, 0.0);
        assert_eq!(meter.levels_db().1, -200.0);
    }

    #[test]
    fn test_peak_released_to_current_frame_max() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            peak_hold_secs: 0.01,
            sample_rate: 1000,
        });

        assert_eq!(meter.process(&[0.9; 10]).1, 0.9);
        // Бюджет в 10 отсчётов расходуется одним тихим кадром
        assert_eq!(meter.process(&[0.3; 10]).1, 0.9);
        // Жёсткий сброс к максимуму кадра, а не затухание
        assert_eq!(meter.process(&[0.3; 10]).1, 0.3);
        assert_eq!(meter.process(&[0.1; 10]).1, 0.1);
    }

    #[test]
    fn test_new_peak_restarts_hold() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            peak_hold_secs: 0.02,
            sample_rate: 1000,
        });

        meter.process(&[0.5; 10]);
        meter.process(&[0.1; 10]);
        assert_eq!(meter.process(&[0.8; 10]).1, 0.8);
        assert_eq!(meter.process(&[0.1; 10]).1, 0.8);
        assert_eq!(meter.process(&[0.1; 10]).1, 0.8);
        assert_eq!(meter.process(&[0.1; 10]).1, 0.1);
    }

    #[test]
    fn test_equal_peak_does_not_restart_hold() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            peak_hold_secs: 0.01,
            sample_rate: 1000,
        });

        meter.process(&[0.5; 10]);
        assert_eq!(meter.process(&[0.5; 10]).1, 0.5);
        assert_eq!(meter.process(&[0.2; 10]).1, 0.2);
    }

    #[test]
    fn test_empty_frame_changes_nothing() {
        let meter = hold_meter();
        let before = meter.process(&[0.25; 64]);
        assert_eq!(meter.process(&[]), before);
        assert_eq!(meter.levels(), before);
    }

    #[test]
    fn test_per_frame_rms_ignores_history() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            ..MeterParams::default()
        });

        meter.process(&[1.0; 512]);
        let (rms, _) = meter.process(&[0.0; 512]);
        assert_eq!(rms, 0.0);
    }

    #[test]
    fn test_rolling_window_spans_frames() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::Samples(1024),
            ..MeterParams::default()
        });

        meter.process(&[1.0; 512]);
        let (rms, _) = meter.process(&[0.0; 512]);
        assert!((rms - 0.5f32.sqrt()).abs() < 1e-6);

        // Громкая половина уже вышла из окна
        let (rms, _) = meter.process(&[0.0; 512]);
        assert_eq!(rms, 0.0);
    }

    #[test]
    fn test_reset() {
        let meter = hold_meter();
        meter.process(&[0.7; 128]);
        meter.reset();
        assert_eq!(meter.levels(), (0.0, 0.0));
        assert_eq!(meter.process(&[0.2; 128]).1, 0.2);
    }

    #[test]
    fn test_meter_fraction() {
        assert_eq!(meter_fraction(0.0, -60.0), 1.0);
        assert_eq!(meter_fraction(-60.0, -60.0), 0.0);
        assert_eq!(meter_fraction(-200.0, -60.0), 0.0);
        assert!((meter_fraction(-30.0, -60.0) - 0.5).abs() < 1e-6);
        assert_eq!(meter_fraction(6.0, -60.0), 1.0);
    }

    #[test]
    fn test_levels_readable_from_other_thread() {
        let meter = std::sync::Arc::new(hold_meter());
        let writer = meter.clone();
        let handle = std::thread::spawn(move || {
            for _ in 0..100 {
                writer.process(&[0.5; 256]);
            }
        });
        for _ in 0..100 {
            let (rms_db, peak_db) = meter.levels_db();
            assert!(rms_db.is_finite() && peak_db.is_finite());
        }
        handle.join().unwrap();
        assert!((meter.levels().0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_hold_counts_time_not_samples() {
        let meter = LevelMeter::new(MeterParams {
            window: RmsWindow::PerFrame,
            peak_hold_secs: 1.0,
            sample_rate: 1000,
        });
        let loud = [1.0f32; 200];
        let quiet = [0.1f32; 200];

        // 100 отсчётов на канал = 0.1 с на кадр
        assert_eq!(meter.process_interleaved(&loud, 2).1, 1.0);
        for frame in 1..=10 {
            let (_, peak) = meter.process_interleaved(&quiet, 2);
            assert_eq!(peak, 1.0, "stereo peak released after {frame} quiet frames");
        }
        assert_eq!(meter.process_interleaved(&quiet, 2).1, 0.1);
    }

    #[test]
    fn test_mono_process_matches_single_channel() {
        let mono = hold_meter();
        let interleaved = hold_meter();
        for frame in [[0.4f32; 512], [0.1; 512], [0.7; 512]] {
            assert_eq!(mono.process(&frame), interleaved.process_interleaved(&frame, 1));
        }
    }
}
