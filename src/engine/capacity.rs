use ulid::Ulid;

use crate::model::ClassRoster;

use super::EngineError;

pub fn can_enroll(roster: &ClassRoster) -> bool {
    roster.len() < roster.capacity as usize
}

/// Check that `member_id` may join the class without mutating the roster.
/// Duplicate enrollment is reported before fullness.
pub fn check_enroll(class_id: Ulid, roster: &ClassRoster, member_id: Ulid) -> Result<(), EngineError> {
    if roster.contains(&member_id) {
        return Err(EngineError::AlreadyEnrolled { class_id, member_id });
    }
    if !can_enroll(roster) {
        return Err(EngineError::CapacityExceeded {
            class_id,
            capacity: roster.capacity,
        });
    }
    Ok(())
}

pub fn enroll(class_id: Ulid, roster: &mut ClassRoster, member_id: Ulid) -> Result<(), EngineError> {
    check_enroll(class_id, roster, member_id)?;
    roster.members.insert(member_id);
    Ok(())
}

pub fn withdraw(roster: &mut ClassRoster, member_id: Ulid) -> Result<(), EngineError> {
    if roster.members.remove(&member_id) {
        Ok(())
    } else {
        Err(EngineError::NotFound(member_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_until_full() {
        let class_id = Ulid::new();
        let mut roster = ClassRoster::new(2);
        enroll(class_id, &mut roster, Ulid::new()).unwrap();
        assert!(can_enroll(&roster));
        enroll(class_id, &mut roster, Ulid::new()).unwrap();
        assert!(!can_enroll(&roster));

        let result = enroll(class_id, &mut roster, Ulid::new());
        assert!(matches!(
            result,
            Err(EngineError::CapacityExceeded { capacity: 2, .. })
        ));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn duplicate_reported_before_full() {
        let class_id = Ulid::new();
        let member = Ulid::new();
        let mut roster = ClassRoster::new(1);
        enroll(class_id, &mut roster, member).unwrap();
        let result = enroll(class_id, &mut roster, member);
        assert!(matches!(result, Err(EngineError::AlreadyEnrolled { .. })));
    }

    #[test]
    fn withdraw_frees_a_slot() {
        let class_id = Ulid::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let mut roster = ClassRoster::new(1);
        enroll(class_id, &mut roster, a).unwrap();
        assert!(enroll(class_id, &mut roster, b).is_err());
        withdraw(&mut roster, a).unwrap();
        enroll(class_id, &mut roster, b).unwrap();
        assert!(roster.contains(&b));
    }

    #[test]
    fn withdraw_unknown_member() {
        let mut roster = ClassRoster::new(3);
        assert!(matches!(
            withdraw(&mut roster, Ulid::new()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn zero_capacity_never_enrolls() {
        let roster = ClassRoster::new(0);
        assert!(!can_enroll(&roster));
    }
}
