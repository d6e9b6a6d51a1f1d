//! Lazy, finite iteration over a paged listing.
//!
//! "More pages" is an explicit loop over cursors rather than recursion, so a
//! folder with a million children costs one stack frame.

use crate::error::RemoteError;
use crate::remote::{Cursor, Paged};

enum State {
    Start,
    Next(Cursor),
    Finished,
}

/// Iterator yielding each page of a listing in turn.
///
/// `fetch(None)` requests the first page, `fetch(Some(cursor))` the next.
/// After the last page or the first error the iterator is exhausted.
pub struct Pages<T, F>
where
    F: FnMut(Option<&Cursor>) -> Result<Paged<T>, RemoteError>,
{
    fetch: F,
    state: State,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Option<&Cursor>) -> Result<Paged<T>, RemoteError>,
{
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            state: State::Start,
            _item: std::marker::PhantomData,
        }
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Option<&Cursor>) -> Result<Paged<T>, RemoteError>,
{
    type Item = Result<Vec<T>, RemoteError>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = match std::mem::replace(&mut self.state, State::Finished) {
            State::Finished => return None,
            State::Start => (self.fetch)(None),
            State::Next(cursor) => (self.fetch)(Some(&cursor)),
        };
        match result {
            Ok(page) => {
                if page.has_more {
                    self.state = State::Next(page.cursor);
                }
                Some(Ok(page.items))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
