//! Dense per-service slot assignment for the endpoint table. Slots for a
//! service always form the prefix `1..=n`; removal swaps the last slot into
//! the vacated one so the kernel can trust the service's endpoint count as
//! the only bound. A reader racing the swap may see the moved backend at both
//! slots, each of which is a live destination.

use mesh_accel_common::tables::{EndpointKey, EndpointValue};
use tracing::warn;

use crate::bpf::{BpfMap, TableState};
use crate::{Error, Result};

#[derive(Default)]
pub struct EndpointIndex {
    /// Slot `i + 1` of a service holds `by_service[&id][i]`.
    by_service: ahash::HashMap<u32, Vec<u32>>,
    /// Backend to (service, 1-based slot) reverse index.
    by_backend: ahash::HashMap<u32, ahash::HashMap<u32, u32>>,
}

impl EndpointIndex {
    pub fn count(&self, service_id: u32) -> u32 {
        self.by_service
            .get(&service_id)
            .map(|slots| slots.len() as u32)
            .unwrap_or(0)
    }

    pub fn contains(&self, service_id: u32, backend_uid: u32) -> bool {
        self.by_backend
            .get(&backend_uid)
            .is_some_and(|services| services.contains_key(&service_id))
    }

    pub fn backends_of(&self, service_id: u32) -> &[u32] {
        self.by_service
            .get(&service_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn services_of(&self, backend_uid: u32) -> Vec<u32> {
        self.by_backend
            .get(&backend_uid)
            .map(|services| services.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Writes the backend into the next free slot and returns it. Appending
    /// an existing member returns its current slot without a write.
    pub fn append<E>(
        &mut self,
        endpoints: &mut TableState<E, EndpointKey, EndpointValue>,
        service_id: u32,
        backend_uid: u32,
    ) -> Result<u32>
    where
        E: BpfMap<EndpointKey, EndpointValue>,
    {
        if let Some(slot) = self
            .by_backend
            .get(&backend_uid)
            .and_then(|services| services.get(&service_id))
        {
            return Ok(*slot);
        }
        let slots = self.by_service.entry(service_id).or_default();
        let slot = slots.len() as u32 + 1;
        endpoints.update(
            EndpointKey::new(service_id, slot),
            EndpointValue { backend_uid },
        )?;
        slots.push(backend_uid);
        self.by_backend
            .entry(backend_uid)
            .or_default()
            .insert(service_id, slot);
        Ok(slot)
    }

    /// Removes the backend's slot, compacting by moving the last slot into
    /// the hole. Returns the slot it held, or `None` if it was not a member.
    pub fn remove<E>(
        &mut self,
        endpoints: &mut TableState<E, EndpointKey, EndpointValue>,
        service_id: u32,
        backend_uid: u32,
    ) -> Result<Option<u32>>
    where
        E: BpfMap<EndpointKey, EndpointValue>,
    {
        let Some(slot) = self
            .by_backend
            .get(&backend_uid)
            .and_then(|services| services.get(&service_id))
            .copied()
        else {
            return Ok(None);
        };
        let Some(slots) = self.by_service.get_mut(&service_id) else {
            return Err(Error::InvariantViolated(format!(
                "backend {backend_uid} indexed for service {service_id} but the service has no slots"
            )));
        };
        let last_slot = slots.len() as u32;
        if slot < last_slot {
            let moved = slots[last_slot as usize - 1];
            endpoints.update(
                EndpointKey::new(service_id, slot),
                EndpointValue {
                    backend_uid: moved,
                },
            )?;
            slots[slot as usize - 1] = moved;
            if let Some(services) = self.by_backend.get_mut(&moved) {
                services.insert(service_id, slot);
            }
        }
        endpoints.delete(&EndpointKey::new(service_id, last_slot))?;
        slots.pop();
        if slots.is_empty() {
            self.by_service.remove(&service_id);
        }
        if let Some(services) = self.by_backend.get_mut(&backend_uid) {
            services.remove(&service_id);
            if services.is_empty() {
                self.by_backend.remove(&backend_uid);
            }
        }
        Ok(Some(slot))
    }

    /// Drops every slot of a service.
    pub fn remove_service<E>(
        &mut self,
        endpoints: &mut TableState<E, EndpointKey, EndpointValue>,
        service_id: u32,
    ) -> Result<()>
    where
        E: BpfMap<EndpointKey, EndpointValue>,
    {
        let Some(slots) = self.by_service.remove(&service_id) else {
            return Ok(());
        };
        for (position, backend_uid) in slots.iter().enumerate() {
            endpoints.delete(&EndpointKey::new(service_id, position as u32 + 1))?;
            if let Some(services) = self.by_backend.get_mut(backend_uid) {
                services.remove(&service_id);
                if services.is_empty() {
                    self.by_backend.remove(backend_uid);
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the index from a kernel snapshot, repairing slot holes left
    /// by an interrupted predecessor: surviving entries are shifted down and
    /// the orphaned tail keys deleted.
    pub fn restore<E>(
        &mut self,
        endpoints: &mut TableState<E, EndpointKey, EndpointValue>,
        entries: &[(EndpointKey, EndpointValue)],
    ) -> Result<()>
    where
        E: BpfMap<EndpointKey, EndpointValue>,
    {
        self.by_service.clear();
        self.by_backend.clear();

        let mut per_service: ahash::HashMap<u32, Vec<(u32, u32)>> = ahash::HashMap::default();
        for (key, value) in entries {
            per_service
                .entry(key.service_id)
                .or_default()
                .push((key.backend_index, value.backend_uid));
        }
        for (service_id, mut slots) in per_service {
            slots.sort_unstable();
            for (position, (slot, backend_uid)) in slots.iter().enumerate() {
                let target = position as u32 + 1;
                if *slot != target {
                    warn!(
                        service_id,
                        slot, target, "endpoint slot hole found on restart, compacting"
                    );
                    endpoints.update(
                        EndpointKey::new(service_id, target),
                        EndpointValue {
                            backend_uid: *backend_uid,
                        },
                    )?;
                    endpoints.delete(&EndpointKey::new(service_id, *slot))?;
                }
                self.by_backend
                    .entry(*backend_uid)
                    .or_default()
                    .insert(service_id, target);
            }
            self.by_service
                .insert(service_id, slots.into_iter().map(|(_, uid)| uid).collect());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type FakeEndpoints = TableState<ahash::HashMap<EndpointKey, EndpointValue>, EndpointKey, EndpointValue>;

    fn fake_endpoints() -> FakeEndpoints {
        TableState::new(ahash::HashMap::default())
    }

    fn slot_of(endpoints: &FakeEndpoints, service_id: u32, slot: u32) -> Option<u32> {
        endpoints
            .get_from_cache(&EndpointKey::new(service_id, slot))
            .map(|v| v.backend_uid)
    }

    #[test]
    fn append_assigns_dense_slots() {
        let mut endpoints = fake_endpoints();
        let mut index = EndpointIndex::default();
        assert_eq!(index.append(&mut endpoints, 1, 100).unwrap(), 1);
        assert_eq!(index.append(&mut endpoints, 1, 101).unwrap(), 2);
        // re-appending a member is a no-op
        assert_eq!(index.append(&mut endpoints, 1, 100).unwrap(), 1);
        assert_eq!(index.count(1), 2);
        assert_eq!(slot_of(&endpoints, 1, 1), Some(100));
        assert_eq!(slot_of(&endpoints, 1, 2), Some(101));
    }

    #[test]
    fn remove_middle_swaps_with_last() {
        let mut endpoints = fake_endpoints();
        let mut index = EndpointIndex::default();
        for backend in [100, 101, 102] {
            index.append(&mut endpoints, 1, backend).unwrap();
        }
        assert_eq!(index.remove(&mut endpoints, 1, 100).unwrap(), Some(1));
        assert_eq!(index.count(1), 2);
        assert_eq!(slot_of(&endpoints, 1, 1), Some(102));
        assert_eq!(slot_of(&endpoints, 1, 2), Some(101));
        assert_eq!(slot_of(&endpoints, 1, 3), None);
        assert!(index.contains(1, 102));
        assert!(!index.contains(1, 100));
    }

    #[test]
    fn remove_last_just_deletes() {
        let mut endpoints = fake_endpoints();
        let mut index = EndpointIndex::default();
        index.append(&mut endpoints, 1, 100).unwrap();
        index.append(&mut endpoints, 1, 101).unwrap();
        assert_eq!(index.remove(&mut endpoints, 1, 101).unwrap(), Some(2));
        assert_eq!(slot_of(&endpoints, 1, 1), Some(100));
        assert_eq!(slot_of(&endpoints, 1, 2), None);
    }

    #[test]
    fn remove_of_non_member_reports_none() {
        let mut endpoints = fake_endpoints();
        let mut index = EndpointIndex::default();
        assert_eq!(index.remove(&mut endpoints, 1, 100).unwrap(), None);
    }

    #[test]
    fn restore_rebuilds_and_compacts_holes() {
        let mut endpoints = fake_endpoints();
        // slots 1 and 3: slot 2 lost mid-removal by the previous process
        endpoints
            .update(EndpointKey::new(1, 1), EndpointValue { backend_uid: 100 })
            .unwrap();
        endpoints
            .update(EndpointKey::new(1, 3), EndpointValue { backend_uid: 102 })
            .unwrap();
        endpoints
            .update(EndpointKey::new(2, 1), EndpointValue { backend_uid: 100 })
            .unwrap();
        let entries = endpoints.cached_entries();

        let mut index = EndpointIndex::default();
        index.restore(&mut endpoints, &entries).unwrap();
        assert_eq!(index.count(1), 2);
        assert_eq!(index.backends_of(1), &[100, 102]);
        assert_eq!(slot_of(&endpoints, 1, 2), Some(102));
        assert_eq!(slot_of(&endpoints, 1, 3), None);
        let mut services = index.services_of(100);
        services.sort_unstable();
        assert_eq!(services, vec![1, 2]);
    }
}
