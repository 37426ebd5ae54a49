use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use tracing::{debug, info};

use super::{queue::QueueStore, track::TrackId};

/// Política que decide qué se reproduce cuando termina (o falla) un track.
///
/// Los códigos numéricos son los que se guardan en las preferencias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RepeatMode {
    /// Avanza y se detiene al final
    #[default]
    Forward,
    /// Avanza y vuelve al inicio
    RepeatQueue,
    /// Repite el mismo track
    RepeatCurrent,
    /// Elección uniforme, con reemplazo
    Random,
    /// Bolsa aleatoria sin reemplazo
    RandomNoRepeat,
    /// Elección uniforme independiente en cada evento
    TrueRandom,
    /// Retrocede y se detiene al inicio
    Backward,
    /// Retrocede y salta al final
    BackwardRepeatQueue,
}

impl RepeatMode {
    pub const ALL: [RepeatMode; 8] = [
        RepeatMode::Forward,
        RepeatMode::RepeatQueue,
        RepeatMode::RepeatCurrent,
        RepeatMode::Random,
        RepeatMode::RandomNoRepeat,
        RepeatMode::TrueRandom,
        RepeatMode::Backward,
        RepeatMode::BackwardRepeatQueue,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Modos en los que la posición en la cola no tiene significado
    pub fn is_random(self) -> bool {
        matches!(
            self,
            RepeatMode::Random | RepeatMode::RandomNoRepeat | RepeatMode::TrueRandom
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            RepeatMode::Forward => "No Repeat",
            RepeatMode::RepeatQueue => "Repeat Queue",
            RepeatMode::RepeatCurrent => "Repeat Current",
            RepeatMode::Random => "Random",
            RepeatMode::RandomNoRepeat => "Random Without Repeat",
            RepeatMode::TrueRandom => "True Random",
            RepeatMode::Backward => "Backward",
            RepeatMode::BackwardRepeatQueue => "Backward Repeat Queue",
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for RepeatMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or_else(|| format!("modo de repetición desconocido: {code}"))
    }
}

impl From<RepeatMode> for u8 {
    fn from(mode: RepeatMode) -> Self {
        mode.code()
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    /// Acepta el código numérico o el nombre (sin distinguir mayúsculas ni espacios)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.trim().parse::<u8>() {
            return Self::try_from(code);
        }

        let wanted: String = s.chars().filter(|c| c.is_alphanumeric()).collect();
        Self::ALL
            .iter()
            .copied()
            .find(|mode| {
                let name: String = mode.name().chars().filter(|c| c.is_alphanumeric()).collect();
                let variant = format!("{mode:?}");
                name.eq_ignore_ascii_case(&wanted) || variant.eq_ignore_ascii_case(&wanted)
            })
            .ok_or_else(|| format!("modo de repetición desconocido: {s}"))
    }
}

/// Quién pide el siguiente índice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Fin natural de un track
    Auto,
    /// `next()` del usuario o avance tras un error repetido
    Skip,
    /// `prev()` del usuario
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Stay,
    Next { wrap: bool },
    Prev { wrap: bool },
    Draw,
}

fn plan(mode: RepeatMode, step: Step) -> Move {
    use RepeatMode::*;

    match (mode, step) {
        (Random | RandomNoRepeat | TrueRandom, _) => Move::Draw,
        (RepeatCurrent, Step::Auto) => Move::Stay,
        (RepeatCurrent, Step::Skip) => Move::Next { wrap: true },
        (RepeatCurrent, Step::Back) => Move::Prev { wrap: true },
        (Forward, Step::Back) => Move::Prev { wrap: false },
        (Forward, _) => Move::Next { wrap: false },
        (RepeatQueue, Step::Back) => Move::Prev { wrap: true },
        (RepeatQueue, _) => Move::Next { wrap: true },
        (Backward, Step::Back) => Move::Next { wrap: false },
        (Backward, _) => Move::Prev { wrap: false },
        (BackwardRepeatQueue, Step::Back) => Move::Next { wrap: true },
        (BackwardRepeatQueue, _) => Move::Prev { wrap: true },
    }
}

/// Siguiente índice para los modos posicionales; `None` si hay que detenerse
/// o si el modo es aleatorio (eso lo resuelve `RepeatPolicy`).
pub fn positional_next(len: usize, current: usize, mode: RepeatMode, step: Step) -> Option<usize> {
    if len == 0 {
        return None;
    }

    match plan(mode, step) {
        Move::Stay => Some(current.min(len - 1)),
        Move::Next { wrap } => {
            if current + 1 < len {
                Some(current + 1)
            } else if wrap {
                Some(0)
            } else {
                None
            }
        }
        Move::Prev { wrap } => {
            if current > 0 {
                Some((current - 1).min(len - 1))
            } else if wrap {
                Some(len - 1)
            } else {
                None
            }
        }
        Move::Draw => None,
    }
}

/// Bolsa de ids que se consumen sin reemplazo
#[derive(Debug, Clone, Default)]
pub struct ShuffleBag {
    pool: Vec<TrackId>,
}

impl ShuffleBag {
    pub fn from_ids(ids: impl IntoIterator<Item = TrackId>) -> Self {
        Self {
            pool: ids.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains(&self, id: TrackId) -> bool {
        self.pool.contains(&id)
    }

    /// Saca un id al azar de la bolsa
    pub fn draw(&mut self, rng: &mut impl Rng) -> Option<TrackId> {
        if self.pool.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.pool.len());
        Some(self.pool.swap_remove(index))
    }

    pub fn insert(&mut self, id: TrackId) {
        if !self.pool.contains(&id) {
            self.pool.push(id);
        }
    }

    pub fn remove(&mut self, id: TrackId) {
        self.pool.retain(|x| *x != id);
    }
}

/// Estado del modo de repetición de una sesión: el modo, la bolsa aleatoria y,
/// en los modos aleatorios, el próximo track ya sorteado para el buffer.
#[derive(Debug)]
pub struct RepeatPolicy {
    mode: RepeatMode,
    bag: Option<ShuffleBag>,
    pending: Option<TrackId>,
    rng: StdRng,
}

impl RepeatPolicy {
    pub fn new(mode: RepeatMode) -> Self {
        Self::with_rng(mode, StdRng::from_entropy())
    }

    pub fn with_rng(mode: RepeatMode, rng: StdRng) -> Self {
        Self {
            mode,
            bag: None,
            pending: None,
            rng,
        }
    }

    pub fn mode(&self) -> RepeatMode {
        self.mode
    }

    pub fn bag(&self) -> Option<&ShuffleBag> {
        self.bag.as_ref()
    }

    /// Cambia el modo. Entrar en `RandomNoRepeat` llena una bolsa nueva con toda la
    /// cola; salir de él la descarta.
    pub fn set_mode(&mut self, mode: RepeatMode, queue_ids: impl IntoIterator<Item = TrackId>) -> RepeatMode {
        if mode == self.mode {
            return mode;
        }

        self.bag = match mode {
            RepeatMode::RandomNoRepeat => Some(ShuffleBag::from_ids(queue_ids)),
            _ => None,
        };
        self.pending = None;
        self.mode = mode;

        info!("🔁 Modo de repetición: {}", mode);
        mode
    }

    /// Índice que debe sonar tras `current`
    pub fn next_index<S>(&mut self, queue: &QueueStore<S>, current: usize, step: Step) -> Option<usize> {
        if queue.is_empty() {
            return None;
        }

        if !self.mode.is_random() {
            return positional_next(queue.len(), current, self.mode, step);
        }

        if let Some(index) = self.pending.take().and_then(|id| queue.index_of(id)) {
            return Some(index);
        }
        self.draw(queue)
    }

    /// Índice candidato para pre-cargar. En modos aleatorios el sorteo se hace ahora
    /// y lo consume el siguiente `next_index`.
    pub fn peek_next<S>(&mut self, queue: &QueueStore<S>, current: usize) -> Option<usize> {
        if queue.is_empty() {
            return None;
        }

        if !self.mode.is_random() {
            return positional_next(queue.len(), current, self.mode, Step::Auto);
        }

        if let Some(index) = self.pending.and_then(|id| queue.index_of(id)) {
            return Some(index);
        }

        let index = self.draw(queue)?;
        self.pending = queue.get(index).map(|t| t.id());
        Some(index)
    }

    /// Los tracks nuevos entran en la bolsa
    pub fn on_inserted(&mut self, ids: impl IntoIterator<Item = TrackId>) {
        if let Some(bag) = self.bag.as_mut() {
            for id in ids {
                bag.insert(id);
            }
        }
    }

    /// Un track que empieza a sonar sin haber salido de la bolsa (reproducción
    /// por índice) cuenta igual como visitado en esta ronda
    pub fn on_played(&mut self, id: TrackId) {
        if let Some(bag) = self.bag.as_mut() {
            bag.remove(id);
        }
        if self.pending == Some(id) {
            self.pending = None;
        }
    }

    pub fn on_removed(&mut self, id: TrackId) {
        if let Some(bag) = self.bag.as_mut() {
            bag.remove(id);
        }
        if self.pending == Some(id) {
            self.pending = None;
        }
    }

    fn draw<S>(&mut self, queue: &QueueStore<S>) -> Option<usize> {
        let len = queue.len();

        match self.mode {
            RepeatMode::Random | RepeatMode::TrueRandom => Some(self.rng.gen_range(0..len)),
            RepeatMode::RandomNoRepeat => {
                let bag = self.bag.get_or_insert_with(ShuffleBag::default);
                let mut refilled = false;

                loop {
                    if bag.is_empty() {
                        if refilled {
                            return None;
                        }
                        debug!("🔀 Bolsa aleatoria vacía, rellenando con {} tracks", len);
                        *bag = ShuffleBag::from_ids(queue.ids());
                        refilled = true;
                    }

                    let id = bag.draw(&mut self.rng)?;
                    if let Some(index) = queue.index_of(id) {
                        return Some(index);
                    }
                }
            }
            _ => None,
        }
    }
}
