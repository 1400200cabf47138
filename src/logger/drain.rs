use slog::{Drain, OwnedKVList, Record};

/// Fans a log record out to every drain in the list, discarding individual
/// drain failures so one broken sink (e.g. a full audit file) never takes
/// down logging for the rest.
#[derive(Default)]
pub struct MultiDrain {
    drains: Vec<Box<dyn Drain<Ok = (), Err = slog::Never> + Send>>,
}

impl MultiDrain {
    pub fn add<D: Drain<Ok = (), Err = slog::Never> + Send + 'static>(&mut self, drain: D) {
        self.drains.push(Box::new(drain));
    }
}

impl Drain for MultiDrain {
    type Ok = ();
    type Err = slog::Never;

    fn log(&self, record: &Record, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        for drain in &self.drains {
            let _ = drain.log(record, values);
        }
        Ok(())
    }
}
