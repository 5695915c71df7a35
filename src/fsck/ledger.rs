// src/fsck/ledger.rs
//! Registro de reclamos sobre bloques de datos: quién usa cada bloque y
//! detección de bloques asignados dos veces.

use std::collections::BTreeMap;

use super::fsck_types::{BlockInfo, BlockKind};

#[derive(Debug)]
pub struct BlockLedger {
    block_count: u32,
    claims: BTreeMap<u32, Vec<BlockInfo>>,
    indirect: u32,
}

impl BlockLedger {
    pub fn new(block_count: u32) -> Self {
        Self {
            block_count,
            claims: BTreeMap::new(),
            indirect: 0,
        }
    }

    /// Registra que `info` usa el bloque `bno`. Devuelve el diagnóstico si el
    /// reclamo no es válido; un bloque ya reclamado igual suma el nuevo
    /// reclamo para poder listar a todos sus dueños.
    pub fn claim_block<F>(&mut self, bno: u32, info: BlockInfo, is_allocated: F) -> Option<String>
    where
        F: Fn(u32) -> bool,
    {
        if bno == 0 {
            return Some("reserved bno".into());
        }
        if bno >= self.block_count {
            return Some("out of range".into());
        }
        if !is_allocated(bno) {
            return Some("not allocated".into());
        }

        match self.claims.get_mut(&bno) {
            Some(prior) => {
                let mut msg = String::from("double-allocated");
                for claim in prior.iter() {
                    msg.push_str(&format!("\n  {claim}"));
                }
                prior.push(info);
                Some(msg)
            }
            None => {
                if info.kind != BlockKind::Direct {
                    self.indirect += 1;
                }
                self.claims.insert(bno, vec![info]);
                None
            }
        }
    }

    /// Bloque de datos 0: reservado, lo reclama el propio sistema de archivos.
    pub fn claim_reserved(&mut self) {
        self.claims.entry(0).or_insert_with(|| {
            vec![BlockInfo {
                owner: 0,
                offset: 0,
                kind: BlockKind::Direct,
            }]
        });
    }

    pub fn is_claimed(&self, bno: u32) -> bool {
        self.claims.contains_key(&bno)
    }

    pub fn claims(&self, bno: u32) -> &[BlockInfo] {
        self.claims.get(&bno).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Bloques distintos reclamados (incluye el reservado).
    pub fn claimed_count(&self) -> u32 {
        self.claims.len() as u32
    }

    /// Bloques indirectos y doble-indirectos reclamados.
    pub fn indirect_count(&self) -> u32 {
        self.indirect
    }

    /// Bloques con más de un dueño, con todos sus reclamos.
    pub fn double_allocated(&self) -> impl Iterator<Item = (u32, &[BlockInfo])> + '_ {
        self.claims
            .iter()
            .filter(|(_, claims)| claims.len() > 1)
            .map(|(bno, claims)| (*bno, claims.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(owner: u32, offset: u32) -> BlockInfo {
        BlockInfo {
            owner,
            offset,
            kind: BlockKind::Direct,
        }
    }

    #[test]
    fn second_claim_is_double_allocation() {
        let mut ledger = BlockLedger::new(64);
        assert_eq!(ledger.claim_block(50, direct(2, 0), |_| true), None);

        let msg = ledger.claim_block(50, direct(3, 4), |_| true).unwrap();
        assert!(msg.starts_with("double-allocated"));
        assert!(msg.contains("ino#2 off 0"));

        assert_eq!(ledger.claims(50).len(), 2);
        assert_eq!(ledger.claimed_count(), 1);
        let doubles: Vec<_> = ledger.double_allocated().collect();
        assert_eq!(doubles.len(), 1);
        assert_eq!(doubles[0].0, 50);
    }

    #[test]
    fn invalid_claims_are_not_recorded() {
        let mut ledger = BlockLedger::new(64);
        assert_eq!(
            ledger.claim_block(0, direct(2, 0), |_| true).as_deref(),
            Some("reserved bno")
        );
        assert_eq!(
            ledger.claim_block(64, direct(2, 1), |_| true).as_deref(),
            Some("out of range")
        );
        assert_eq!(
            ledger.claim_block(7, direct(2, 2), |_| false).as_deref(),
            Some("not allocated")
        );
        assert_eq!(ledger.claimed_count(), 0);
        assert!(!ledger.is_claimed(7));
    }

    #[test]
    fn indirect_blocks_are_tallied() {
        let mut ledger = BlockLedger::new(64);
        ledger.claim_reserved();
        let ind = BlockInfo {
            owner: 2,
            offset: 16,
            kind: BlockKind::Indirect,
        };
        ledger.claim_block(9, ind, |_| true);
        ledger.claim_block(10, direct(2, 16), |_| true);
        assert_eq!(ledger.indirect_count(), 1);
        assert_eq!(ledger.claimed_count(), 3);
        assert!(ledger.is_claimed(0));
    }
}
