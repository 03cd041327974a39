//! A bounded log of records
//!
//! Records are serialized with `bincode` when appended. Once the log holds its capacity of
//! records, appending overwrites the oldest record.

use crate::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Clone, Debug)]
pub struct CircularLog {
    capacity: usize,
    entries: VecDeque<Vec<u8>>,
    overwritten: u64,
}

impl CircularLog {
    /// Create a new `CircularLog`
    ///
    /// # Panic
    /// `capacity` is zero
    pub fn new(capacity: usize) -> Self {
        assert_ne!(capacity, 0, "a circular log must hold at least one record");

        CircularLog {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            overwritten: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The number of records lost to overwriting
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    pub fn append<T: Serialize>(&mut self, record: &T) -> Result<(), Error> {
        let entry = bincode::serialize(record).map_err(|e| Error::Decode(e.to_string()))?;

        if self.entries.len() == self.capacity {
            self.entries.pop_front();

            self.overwritten += 1;
        }

        self.entries.push_back(entry);

        Ok(())
    }

    /// Iterate over the records from the oldest to the newest
    pub fn records<T: DeserializeOwned>(&self) -> impl Iterator<Item = Result<T, Error>> + '_ {
        self.entries
            .iter()
            .map(|entry| bincode::deserialize(entry).map_err(|e| Error::Decode(e.to_string())))
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn oldest_record_is_overwritten() {
        let mut log = CircularLog::new(3);

        for record in 0u16..5 {
            log.append(&record).unwrap();
        }

        let records: Vec<u16> = log.records().collect::<Result<_, _>>().unwrap();

        assert_eq!(vec![2, 3, 4], records);
        assert_eq!(2, log.overwritten());
    }

    #[test]
    fn wrong_record_type() {
        let mut log = CircularLog::new(1);

        log.append(&1u8).unwrap();

        assert!(log.records::<u64>().next().unwrap().is_err());
    }
}
