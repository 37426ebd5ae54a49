use tracing::{debug, info};

use super::track::{Track, TrackId, TrackMetadata};

/// Resultado de quitar un track de la cola
#[derive(Debug)]
pub struct Removal<S> {
    pub track: Track<S>,
    /// Posición que ocupaba antes de quitarlo
    pub index: usize,
}

/// Cola ordenada de tracks con un cursor que siempre queda dentro de rango.
///
/// Toda la aritmética de índices se resuelve en el momento de la llamada: ninguna
/// mutación deja el cursor fuera de `[0, len)` (con la cola vacía queda en 0).
#[derive(Debug)]
pub struct QueueStore<S> {
    items: Vec<Track<S>>,
    cursor: usize,
    follow_cursor: bool,
    max_size: usize,
}

impl<S> QueueStore<S> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            follow_cursor: true,
            max_size,
        }
    }

    /// Con `false` (modos aleatorios) las inserciones/borrados no desplazan el cursor
    pub fn set_follow_cursor(&mut self, follow: bool) {
        self.follow_cursor = follow;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Espacio libre antes de llegar al máximo
    pub fn remaining_capacity(&self) -> usize {
        self.max_size.saturating_sub(self.items.len())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Mueve el cursor con aritmética modular: `-1` es la cola, `len` vuelve a 0.
    /// Devuelve el valor normalizado.
    pub fn set_cursor(&mut self, value: isize) -> usize {
        self.cursor = self.wrap(value);
        self.cursor
    }

    pub fn get(&self, index: usize) -> Option<&Track<S>> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Track<S>> {
        self.items.get_mut(index)
    }

    pub fn current(&self) -> Option<&Track<S>> {
        self.items.get(self.cursor)
    }

    pub fn index_of(&self, id: TrackId) -> Option<usize> {
        self.items.iter().position(|t| t.id() == id)
    }

    pub fn find_mut(&mut self, id: TrackId) -> Option<&mut Track<S>> {
        self.items.iter_mut().find(|t| t.id() == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.items.iter().map(|t| t.id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track<S>> {
        self.items.iter()
    }

    /// Inserta tracks en `at` (por defecto al final, y nunca más allá del final).
    ///
    /// Si la inserción cae antes o en el cursor, este avanza la cantidad insertada para
    /// seguir apuntando al mismo track. Devuelve el índice real de inserción.
    pub fn insert(&mut self, tracks: Vec<TrackMetadata>, at: Option<usize>) -> usize {
        let was_empty = self.items.is_empty();
        let at = at.unwrap_or(self.items.len()).min(self.items.len());
        let count = tracks.len().min(self.remaining_capacity());

        if count < tracks.len() {
            info!(
                "⚠️ Cola llena: se agregan {} de {} canciones",
                count,
                tracks.len()
            );
        }

        self.items.splice(
            at..at,
            tracks.into_iter().take(count).map(Track::new),
        );

        if !was_empty && self.follow_cursor && at <= self.cursor {
            self.cursor += count;
        }

        debug!("➕ {} tracks insertados en {} (cursor {})", count, at, self.cursor);
        at
    }

    /// Quita el track en `index`
    pub fn remove_at(&mut self, index: usize) -> Option<Removal<S>> {
        if index >= self.items.len() {
            return None;
        }

        let track = self.items.remove(index);

        if self.follow_cursor && index < self.cursor {
            self.cursor -= 1;
        }
        self.cursor = self.wrap(self.cursor as isize);

        debug!("❌ Track {} quitado de la posición {}", track.id(), index);
        Some(Removal { track, index })
    }

    /// Quita un track por identidad
    pub fn remove_by_id(&mut self, id: TrackId) -> Option<Removal<S>> {
        let index = self.index_of(id)?;
        self.remove_at(index)
    }

    fn wrap(&self, value: isize) -> usize {
        if self.items.is_empty() {
            0
        } else {
            value.rem_euclid(self.items.len() as isize) as usize
        }
    }
}
