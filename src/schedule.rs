use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Morning,
    Afternoon,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Morning, Slot::Afternoon];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Afternoon => "afternoon",
        }
    }

    pub fn parse(s: &str) -> Option<Slot> {
        match s.trim().to_ascii_lowercase().as_str() {
            "morning" => Some(Slot::Morning),
            "afternoon" => Some(Slot::Afternoon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkDay {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl WorkDay {
    pub const ALL: [WorkDay; 5] = [
        WorkDay::Monday,
        WorkDay::Tuesday,
        WorkDay::Wednesday,
        WorkDay::Thursday,
        WorkDay::Friday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkDay::Monday => "Monday",
            WorkDay::Tuesday => "Tuesday",
            WorkDay::Wednesday => "Wednesday",
            WorkDay::Thursday => "Thursday",
            WorkDay::Friday => "Friday",
        }
    }

    pub fn parse(s: &str) -> Option<WorkDay> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monday" => Some(WorkDay::Monday),
            "tuesday" => Some(WorkDay::Tuesday),
            "wednesday" => Some(WorkDay::Wednesday),
            "thursday" => Some(WorkDay::Thursday),
            "friday" => Some(WorkDay::Friday),
            _ => None,
        }
    }

    /// Saturdays and Sundays have no working-day counterpart.
    pub fn from_date(date: NaiveDate) -> Option<WorkDay> {
        match date.weekday() {
            Weekday::Mon => Some(WorkDay::Monday),
            Weekday::Tue => Some(WorkDay::Tuesday),
            Weekday::Wed => Some(WorkDay::Wednesday),
            Weekday::Thu => Some(WorkDay::Thursday),
            Weekday::Fri => Some(WorkDay::Friday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleError {
    pub code: String,
    pub message: String,
}

impl ScheduleError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Strict `YYYY-MM-DD` parsing. A date that does not parse is an input
/// error surfaced to the caller, never a silent non-match.
pub fn parse_date(s: &str) -> Result<NaiveDate, ScheduleError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ScheduleError::new("bad_date", format!("not a YYYY-MM-DD date: {:?}", s)))
}

/// Inclusive on both ends. Calendar dates only; time of day never
/// participates in range membership.
pub fn date_in_range(point: NaiveDate, start: NaiveDate, end: NaiveDate) -> bool {
    start <= point && point <= end
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStatus {
    Available,
    Exceptional,
}

impl TemplateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateStatus::Available => "available",
            TemplateStatus::Exceptional => "exceptional",
        }
    }

    pub fn parse(s: &str) -> Option<TemplateStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Some(TemplateStatus::Available),
            "exceptional" => Some(TemplateStatus::Exceptional),
            _ => None,
        }
    }
}

/// One standing weekly-template row for a trainer or trainee.
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub id: String,
    pub owner_id: String,
    pub day: WorkDay,
    pub slot: Slot,
    pub status: TemplateStatus,
    pub location_id: Option<String>,
    pub validated: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceKind {
    Absence,
    ExceptionalAvailability,
}

impl AbsenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceKind::Absence => "absence",
            AbsenceKind::ExceptionalAvailability => "exceptional-availability",
        }
    }

    pub fn parse(s: &str) -> Option<AbsenceKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "absence" => Some(AbsenceKind::Absence),
            "exceptional-availability" => Some(AbsenceKind::ExceptionalAvailability),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceStatus {
    Pending,
    Validated,
    Cancelled,
}

impl AbsenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsenceStatus::Pending => "pending",
            AbsenceStatus::Validated => "validated",
            AbsenceStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<AbsenceStatus> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(AbsenceStatus::Pending),
            "validated" => Some(AbsenceStatus::Validated),
            "cancelled" => Some(AbsenceStatus::Cancelled),
            _ => None,
        }
    }
}

/// An absence or exceptional-availability record. `slot = None` covers the
/// whole day; a slot-qualified record constrains only that slot.
#[derive(Debug, Clone)]
pub struct AbsenceRecord {
    pub id: String,
    pub person_id: String,
    pub kind: AbsenceKind,
    pub status: AbsenceStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub slot: Option<Slot>,
    pub created_at: i64,
}

/// One coordinator placement: (date, slot, location) with the people the
/// coordinator put there.
#[derive(Debug, Clone)]
pub struct PlanningCell {
    pub date: NaiveDate,
    pub slot: Slot,
    pub location_id: String,
    pub trainer_ids: Vec<String>,
    pub trainee_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayClassification {
    pub exceptionally_available: bool,
    pub absent: bool,
}

/// Classify one person's day/slot against their validated absence records.
///
/// Exceptional availability is evaluated first and short-circuits: a
/// validated absence row must never shadow an approved exception covering
/// the same date. Overlapping records of the same kind are harmless
/// (any-match semantics).
pub fn classify(
    person_id: &str,
    date: NaiveDate,
    slot: Slot,
    absences: &[AbsenceRecord],
) -> DayClassification {
    let matches_kind = |kind: AbsenceKind| {
        absences.iter().any(|a| {
            a.person_id == person_id
                && a.status == AbsenceStatus::Validated
                && a.kind == kind
                && a.slot.map_or(true, |s| s == slot)
                && date_in_range(date, a.start_date, a.end_date)
        })
    };

    if matches_kind(AbsenceKind::ExceptionalAvailability) {
        return DayClassification {
            exceptionally_available: true,
            absent: false,
        };
    }
    if matches_kind(AbsenceKind::Absence) {
        return DayClassification {
            exceptionally_available: false,
            absent: true,
        };
    }
    DayClassification::default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    ExceptionalAvailability,
    Absent,
    AssignedByCoordinator { location_id: String },
    AvailableUnchosen { location_id: Option<String> },
    NotScheduled,
}

impl SlotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SlotStatus::ExceptionalAvailability => "exceptionalAvailability",
            SlotStatus::Absent => "absent",
            SlotStatus::AssignedByCoordinator { .. } => "assignedByCoordinator",
            SlotStatus::AvailableUnchosen { .. } => "availableUnchosen",
            SlotStatus::NotScheduled => "notScheduled",
        }
    }

    pub fn location_id(&self) -> Option<&str> {
        match self {
            SlotStatus::AssignedByCoordinator { location_id } => Some(location_id),
            SlotStatus::AvailableUnchosen { location_id } => location_id.as_deref(),
            _ => None,
        }
    }
}

/// The validated template row for one (owner, day, slot). Duplicate
/// validated rows are a known data-quality defect; the earliest-created
/// row wins deterministically (created_at, then id).
pub fn template_for<'a>(
    owner_id: &str,
    day: WorkDay,
    slot: Slot,
    templates: &'a [TemplateEntry],
) -> Option<&'a TemplateEntry> {
    templates
        .iter()
        .filter(|t| t.validated && t.owner_id == owner_id && t.day == day && t.slot == slot)
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// Effective status of one (trainer, day, slot) on a concrete date.
///
/// Priority chain, first match wins:
/// 1. exceptional availability (overrides coordinator cells and templates),
/// 2. validated absence (suppresses the slot, including any coordinator
///    cell, which may be stale relative to the absence approval),
/// 3. coordinator cell listing the trainer,
/// 4. validated `available` template row,
/// 5. not scheduled.
///
/// Never errors: ragged reference data degrades to `NotScheduled`.
pub fn resolve(
    trainer_id: &str,
    day: WorkDay,
    slot: Slot,
    date: NaiveDate,
    templates: &[TemplateEntry],
    absences: &[AbsenceRecord],
    cells: &[PlanningCell],
) -> SlotStatus {
    let class = classify(trainer_id, date, slot, absences);
    if class.exceptionally_available {
        return SlotStatus::ExceptionalAvailability;
    }
    if class.absent {
        return SlotStatus::Absent;
    }

    if let Some(cell) = cells.iter().find(|c| {
        c.date == date && c.slot == slot && c.trainer_ids.iter().any(|t| t == trainer_id)
    }) {
        return SlotStatus::AssignedByCoordinator {
            location_id: cell.location_id.clone(),
        };
    }

    if let Some(entry) = template_for(trainer_id, day, slot, templates) {
        if entry.status == TemplateStatus::Available {
            return SlotStatus::AvailableUnchosen {
                location_id: entry.location_id.clone(),
            };
        }
    }

    SlotStatus::NotScheduled
}

/// A trainee with their enrollment window.
#[derive(Debug, Clone)]
pub struct TraineeWindow {
    pub id: String,
    pub enrollment_start: NaiveDate,
    pub enrollment_end: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct Suspension {
    pub trainee_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// One historical coordinator placement, used for the preferred-location
/// fallback when a trainer's template row names no location.
#[derive(Debug, Clone)]
pub struct PastPlacement {
    pub trainer_id: String,
    pub day: WorkDay,
    pub slot: Slot,
    pub location_id: String,
}

/// Most frequent historical location for (trainer, day, slot). On a count
/// tie the first location reaching the maximum in snapshot order wins.
pub fn most_frequent_location<'a>(
    trainer_id: &str,
    day: WorkDay,
    slot: Slot,
    history: &'a [PastPlacement],
) -> Option<&'a str> {
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for p in history
        .iter()
        .filter(|p| p.trainer_id == trainer_id && p.day == day && p.slot == slot)
    {
        match counts.iter_mut().find(|(loc, _)| *loc == p.location_id) {
            Some(entry) => entry.1 += 1,
            None => counts.push((&p.location_id, 1)),
        }
    }
    let mut best: Option<(&'a str, usize)> = None;
    for (loc, n) in counts {
        if best.map_or(true, |(_, bn)| n > bn) {
            best = Some((loc, n));
        }
    }
    best.map(|(loc, _)| loc)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftCell {
    pub day: WorkDay,
    pub date: NaiveDate,
    pub slot: Slot,
    pub location_id: String,
    pub location_index: usize,
    pub trainer_ids: Vec<String>,
    pub trainee_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WeekDraft {
    pub cells: Vec<DraftCell>,
}

pub struct MaterializeInput<'a> {
    pub week: &'a [NaiveDate],
    pub trainers: &'a [String],
    pub templates: &'a [TemplateEntry],
    pub absences: &'a [AbsenceRecord],
    pub trainees: &'a [TraineeWindow],
    pub trainee_templates: &'a [TemplateEntry],
    pub trainee_absences: &'a [AbsenceRecord],
    pub suspensions: &'a [Suspension],
    pub history: &'a [PastPlacement],
}

/// Seed a draft week from the standing templates.
///
/// Coordinator cells from earlier weeks are deliberately ignored: the
/// draft comes from the templates, and exceptional availability is left
/// for the coordinator to place by hand. Pure over its snapshot, so
/// identical inputs give identical drafts.
pub fn materialize(input: &MaterializeInput) -> Result<WeekDraft, ScheduleError> {
    if input.week.len() != WorkDay::ALL.len() {
        return Err(ScheduleError::new(
            "bad_week",
            format!("expected 5 working days, got {}", input.week.len()),
        ));
    }
    for (date, day) in input.week.iter().zip(WorkDay::ALL.iter()) {
        if WorkDay::from_date(*date) != Some(*day) {
            return Err(ScheduleError::new(
                "bad_week",
                format!("{} is not a {}", date, day.as_str()),
            ));
        }
    }

    let mut cells: Vec<DraftCell> = Vec::new();

    for (&date, &day) in input.week.iter().zip(WorkDay::ALL.iter()) {
        // Location indices are per day, assigned in first-resolved order.
        let mut day_locations: Vec<String> = Vec::new();

        for slot in Slot::ALL {
            for trainer_id in input.trainers {
                let Some(entry) = template_for(trainer_id, day, slot, input.templates) else {
                    continue;
                };
                if entry.status != TemplateStatus::Available {
                    continue;
                }
                let class = classify(trainer_id, date, slot, input.absences);
                if class.absent || class.exceptionally_available {
                    continue;
                }
                let location = entry.location_id.clone().or_else(|| {
                    most_frequent_location(trainer_id, day, slot, input.history)
                        .map(str::to_string)
                });
                let Some(location) = location else { continue };
                place(
                    &mut cells,
                    &mut day_locations,
                    day,
                    date,
                    slot,
                    location,
                    trainer_id,
                    true,
                );
            }

            for trainee in input.trainees {
                if !date_in_range(date, trainee.enrollment_start, trainee.enrollment_end) {
                    continue;
                }
                if input.suspensions.iter().any(|s| {
                    s.trainee_id == trainee.id && date_in_range(date, s.start_date, s.end_date)
                }) {
                    continue;
                }
                if classify(&trainee.id, date, slot, input.trainee_absences).absent {
                    continue;
                }
                let Some(entry) = template_for(&trainee.id, day, slot, input.trainee_templates)
                else {
                    continue;
                };
                if entry.status != TemplateStatus::Available {
                    continue;
                }
                // Trainees need an explicit location; no history fallback.
                let Some(location) = entry.location_id.clone() else {
                    continue;
                };
                place(
                    &mut cells,
                    &mut day_locations,
                    day,
                    date,
                    slot,
                    location,
                    &trainee.id,
                    false,
                );
            }
        }
    }

    // Cleanup pass: a cell that ended up with nobody in it is dropped.
    cells.retain(|c| !c.trainer_ids.is_empty() || !c.trainee_ids.is_empty());

    Ok(WeekDraft { cells })
}

#[allow(clippy::too_many_arguments)]
fn place(
    cells: &mut Vec<DraftCell>,
    day_locations: &mut Vec<String>,
    day: WorkDay,
    date: NaiveDate,
    slot: Slot,
    location_id: String,
    person_id: &str,
    is_trainer: bool,
) {
    let location_index = match day_locations.iter().position(|l| *l == location_id) {
        Some(i) => i,
        None => {
            day_locations.push(location_id.clone());
            day_locations.len() - 1
        }
    };

    let cell = match cells
        .iter_mut()
        .find(|c| c.date == date && c.slot == slot && c.location_id == location_id)
    {
        Some(c) => c,
        None => {
            cells.push(DraftCell {
                day,
                date,
                slot,
                location_id,
                location_index,
                trainer_ids: Vec::new(),
                trainee_ids: Vec::new(),
            });
            let last = cells.len() - 1;
            &mut cells[last]
        }
    };
    let list = if is_trainer {
        &mut cell.trainer_ids
    } else {
        &mut cell.trainee_ids
    };
    if !list.iter().any(|p| p == person_id) {
        list.push(person_id.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyResult {
    Consistent,
    Warning(String),
    Error(String),
}

/// Compare a self-declared presence against the resolved expectation.
///
/// Declaring present over a validated absence contradicts an
/// administrative decision and is a hard error. Presence without any
/// expected involvement is allowed but flagged, unless the person carries
/// the office flag. Declaring not-present is never blocked.
pub fn check_presence(
    declared_present: bool,
    status: &SlotStatus,
    office_allowed: bool,
) -> ConsistencyResult {
    if !declared_present {
        return ConsistencyResult::Consistent;
    }
    match status {
        SlotStatus::Absent => {
            ConsistencyResult::Error("declared present over a validated absence".to_string())
        }
        SlotStatus::NotScheduled | SlotStatus::AvailableUnchosen { .. } if office_allowed => {
            ConsistencyResult::Consistent
        }
        SlotStatus::NotScheduled => {
            ConsistencyResult::Warning("present without any expected involvement".to_string())
        }
        SlotStatus::AvailableUnchosen { .. } => {
            ConsistencyResult::Warning("present but not placed by the coordinator".to_string())
        }
        SlotStatus::AssignedByCoordinator { .. } | SlotStatus::ExceptionalAvailability => {
            ConsistencyResult::Consistent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTemplate {
    pub owner_id: String,
    pub day: WorkDay,
    pub slot: Slot,
    pub entry_ids: Vec<String>,
}

/// Validated template rows sharing one (owner, day, slot). The resolver
/// tolerates these; the audit reports them for cleanup.
pub fn find_duplicate_templates(templates: &[TemplateEntry]) -> Vec<DuplicateTemplate> {
    let mut out: Vec<DuplicateTemplate> = Vec::new();
    for t in templates.iter().filter(|t| t.validated) {
        if out
            .iter()
            .any(|d| d.owner_id == t.owner_id && d.day == t.day && d.slot == t.slot)
        {
            continue;
        }
        let mut ids: Vec<&TemplateEntry> = templates
            .iter()
            .filter(|o| {
                o.validated && o.owner_id == t.owner_id && o.day == t.day && o.slot == t.slot
            })
            .collect();
        if ids.len() < 2 {
            continue;
        }
        ids.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out.push(DuplicateTemplate {
            owner_id: t.owner_id.clone(),
            day: t.day,
            slot: t.slot,
            entry_ids: ids.into_iter().map(|e| e.id.clone()).collect(),
        });
    }
    out
}

/// Absence records whose person no longer exists in the roster snapshot.
pub fn find_orphan_absences<'a>(
    absences: &'a [AbsenceRecord],
    known_person_ids: &[String],
) -> Vec<&'a AbsenceRecord> {
    absences
        .iter()
        .filter(|a| !known_person_ids.iter().any(|id| *id == a.person_id))
        .collect()
}

/// The five working days of the week containing `monday`, which must
/// actually be a Monday.
pub fn week_working_days(monday: NaiveDate) -> Result<[NaiveDate; 5], ScheduleError> {
    if monday.weekday() != Weekday::Mon {
        return Err(ScheduleError::new(
            "bad_week",
            format!("{} is not a Monday", monday),
        ));
    }
    let mut days = [monday; 5];
    for (i, d) in days.iter_mut().enumerate() {
        *d = monday + chrono::Duration::days(i as i64);
    }
    Ok(days)
}
