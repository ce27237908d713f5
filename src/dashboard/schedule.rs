//! Calendar
//!
//! Events live only in memory; the initial set is injected (normally from
//! [`crate::fixtures::calendar_events`]).

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::feedback::{Toast, ViewError, ViewResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Shift,
    Meeting,
    Maintenance,
    Appointment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// May be earlier than `start_time` for overnight shifts
    pub end_time: NaiveTime,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// Form input for a new event
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub kind: EventKind,
    pub description: Option<String>,
    pub location: Option<String>,
    pub participants: Vec<String>,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, kind: EventKind) -> Self {
        Self {
            title: title.into(),
            start_time: None,
            end_time: None,
            kind,
            description: None,
            location: None,
            participants: Vec::new(),
        }
    }

    pub fn between(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }
}

pub struct Schedule {
    events: RwLock<Vec<CalendarEvent>>,
}

impl Schedule {
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Add an event on `date`; title and both times are required
    pub fn add(&self, date: NaiveDate, input: NewEvent) -> ViewResult<(CalendarEvent, Toast)> {
        let (start_time, end_time) = match (input.start_time, input.end_time) {
            (Some(start), Some(end)) if !input.title.trim().is_empty() => (start, end),
            _ => {
                return Err(ViewError::validation(
                    "Missing information",
                    "Please fill in all required fields",
                ))
            }
        };

        let event = CalendarEvent {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title,
            date,
            start_time,
            end_time,
            kind: input.kind,
            description: input.description.filter(|d| !d.is_empty()),
            participants: input.participants,
            location: input.location.filter(|l| !l.is_empty()),
        };

        if let Ok(mut events) = self.events.write() {
            events.push(event.clone());
        }
        let toast = Toast::success(
            "Event added",
            format!("{} has been added to your calendar", event.title),
        );
        Ok((event, toast))
    }

    pub fn remove(&self, id: &str) -> ViewResult<Toast> {
        let removed = self
            .events
            .write()
            .ok()
            .and_then(|mut events| {
                let index = events.iter().position(|e| e.id == id)?;
                Some(events.remove(index))
            });

        match removed {
            Some(_) => Ok(Toast::success(
                "Event deleted",
                "The event has been removed from your calendar",
            )),
            None => Err(ViewError::NotFound(format!("Event {}", id))),
        }
    }

    /// Events on `day`, earliest first
    pub fn events_on(&self, day: NaiveDate) -> Vec<CalendarEvent> {
        let mut events: Vec<_> = self
            .events()
            .into_iter()
            .filter(|e| e.date == day)
            .collect();
        events.sort_by_key(|e| e.start_time);
        events
    }

    /// Event kinds per day, for the month grid
    pub fn day_markers(&self) -> BTreeMap<NaiveDate, Vec<EventKind>> {
        let mut markers: BTreeMap<NaiveDate, Vec<EventKind>> = BTreeMap::new();
        for event in self.events() {
            let kinds = markers.entry(event.date).or_default();
            if !kinds.contains(&event.kind) {
                kinds.push(event.kind);
            }
        }
        for kinds in markers.values_mut() {
            kinds.sort();
        }
        markers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()
    }

    #[test]
    fn test_add_requires_title_and_times() {
        let schedule = Schedule::new(Vec::new());

        let err = schedule
            .add(today(), NewEvent::new("Rounds", EventKind::Shift))
            .unwrap_err();
        assert_eq!(err.toast().title, "Missing information");

        let err = schedule
            .add(today(), NewEvent::new("  ", EventKind::Shift).between(time(7, 0), time(15, 0)))
            .unwrap_err();
        assert!(err.toast().is_destructive());
        assert!(schedule.events().is_empty());

        let (event, toast) = schedule
            .add(today(), NewEvent::new("Rounds", EventKind::Shift).between(time(7, 0), time(15, 0)))
            .unwrap();
        assert_eq!(toast.description, "Rounds has been added to your calendar");
        assert_eq!(schedule.events_on(today()), vec![event]);
    }

    #[test]
    fn test_remove_and_markers() {
        let schedule = Schedule::new(fixtures::calendar_events(today()));
        let on_today = schedule.events_on(today());
        assert_eq!(on_today.len(), 2);
        assert!(on_today[0].start_time < on_today[1].start_time);

        let markers = schedule.day_markers();
        assert_eq!(
            markers.get(&today()),
            Some(&vec![EventKind::Meeting, EventKind::Maintenance])
        );

        schedule.remove(&on_today[0].id).unwrap();
        assert_eq!(schedule.events_on(today()).len(), 1);
        assert!(schedule.remove("missing").is_err());
    }
}
