//! Block-wise response reassembly
//!
//! Multi-block responses are accumulated per `(ETag, token)` until the last
//! block arrives. Every decision also yields the Block2 descriptor of the next
//! block to request, so a lost or stale buffer always has a recovery path:
//! restart the transfer from block 0.

use std::collections::HashMap;

use dots_client_core::{Block, BlockSizeConfig, Etag, Pdu, Token};
use tracing::{debug, warn};

/// Reassembly buffer key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub etag: Etag,
    pub token: Token,
}

/// Result of feeding one response into the assembler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCheck {
    /// Whether another block must be requested
    pub more_blocks: bool,
    pub etag: Option<Etag>,
    /// Descriptor for the next request, or the final block when complete
    pub block: Option<Block>,
    /// The whole representation once the last block arrived
    pub assembled: Option<Pdu>,
}

impl BlockCheck {
    fn not_blockwise() -> Self {
        Self {
            more_blocks: false,
            etag: None,
            block: None,
            assembled: None,
        }
    }

    fn request_next(etag: Etag, block: Block) -> Self {
        Self {
            more_blocks: true,
            etag: Some(etag),
            block: Some(block),
            assembled: None,
        }
    }

    fn complete(etag: Etag, block: Block, assembled: Pdu) -> Self {
        Self {
            more_blocks: false,
            etag: Some(etag),
            block: Some(block),
            assembled: Some(assembled),
        }
    }
}

/// A partially assembled response and the block expected next
#[derive(Debug, Clone)]
struct Reassembly {
    pdu: Pdu,
    next: Block,
}

#[derive(Debug, Default)]
pub struct BlockAssembler {
    buffers: HashMap<BlockKey, Reassembly>,
    sizes: BlockSizeConfig,
}

impl BlockAssembler {
    pub fn new(sizes: BlockSizeConfig) -> Self {
        Self {
            buffers: HashMap::new(),
            sizes,
        }
    }

    pub fn set_sizes(&mut self, sizes: BlockSizeConfig) {
        self.sizes = sizes;
    }

    pub fn sizes(&self) -> &BlockSizeConfig {
        &self.sizes
    }

    /// Number of partially assembled responses
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.buffers.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Drop every partial response received under `token`, whatever its ETag
    pub fn discard_token(&mut self, token: &Token) -> usize {
        let before = self.buffers.len();
        self.buffers.retain(|key, _| key.token != *token);
        before - self.buffers.len()
    }

    pub fn check_block(&mut self, pdu: &Pdu) -> BlockCheck {
        let options = pdu
            .block2()
            .and_then(|block| pdu.size2().map(|size| (block, size)))
            .and_then(|(block, size)| pdu.etag().map(|etag| (block, size, etag)));
        let (block, size2, etag) = match options {
            Ok(options) => options,
            Err(e) => {
                warn!("Not a block-wise response ({}): {}", e, pdu);
                return BlockCheck::not_blockwise();
            }
        };

        let key = BlockKey {
            etag: etag.clone(),
            token: pdu.token.clone(),
        };
        debug!(
            "Block2 {} of {} bytes, etag {} token {}",
            block, size2, etag, pdu.token
        );

        if block.more {
            if block.is_first() {
                self.discard_token(&pdu.token);
                let next = self.first_successor(&block);
                self.buffers.insert(
                    key,
                    Reassembly {
                        pdu: pdu.clone(),
                        next,
                    },
                );
                return BlockCheck::request_next(etag, next);
            }

            let Some(buffer) = self.buffers.get_mut(&key) else {
                return self.restart(etag, block, &pdu.token, "without a reassembly buffer");
            };
            let received = buffer.pdu.data.len();
            if block.offset() < received {
                debug!("Duplicate block {} for token {}", block, pdu.token);
                return BlockCheck::request_next(etag, buffer.next);
            }
            if block.offset() > received {
                return self.restart(etag, block, &pdu.token, "after a gap");
            }

            let next = match block.next() {
                Ok(next) => Block { more: false, ..next },
                Err(e) => {
                    warn!("Abandoning block-wise transfer for token {}: {}", pdu.token, e);
                    self.discard_token(&pdu.token);
                    return BlockCheck::not_blockwise();
                }
            };
            buffer.pdu.data.extend_from_slice(&pdu.data);
            buffer.next = next;
            return BlockCheck::request_next(etag, next);
        }

        if let Some(buffer) = self.buffers.get(&key) {
            if block.offset() != buffer.pdu.data.len() {
                return self.restart(etag, block, &pdu.token, "out of sequence");
            }
        }
        if let Some(mut buffer) = self.buffers.remove(&key) {
            buffer.pdu.data.extend_from_slice(&pdu.data);
            debug!(
                "Reassembled {} bytes for token {}",
                buffer.pdu.data.len(),
                pdu.token
            );
            return BlockCheck::complete(etag, block, buffer.pdu);
        }

        if !block.is_first() {
            return self.restart(etag, block, &pdu.token, "without a reassembly buffer");
        }

        self.discard_token(&pdu.token);
        BlockCheck::complete(etag, block, pdu.clone())
    }

    /// Discard partial state for `token` and ask for block 0 again
    fn restart(&mut self, etag: Etag, block: Block, token: &Token, reason: &str) -> BlockCheck {
        warn!(
            "Block {} arrived {}, restarting transfer for token {}",
            block, reason, token
        );
        self.discard_token(token);
        let first = Block {
            num: 0,
            more: false,
            szx: block.szx,
        };
        BlockCheck::request_next(etag, first)
    }

    /// Pick the descriptor following a first block
    fn first_successor(&self, block: &Block) -> Block {
        let (num, szx) = match (
            self.sizes.initial_request_block_size,
            self.sizes.second_request_block_size,
        ) {
            (None, Some(second)) if second <= block.szx => (1 << (block.szx - second), second),
            _ => (1, block.szx),
        };
        Block {
            num,
            more: false,
            szx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dots_client_core::{Code, MessageId, MessageType, OptionKey};
    use proptest::prelude::*;

    const TOKEN: [u8; 2] = [0xab, 0xcd];

    fn block_pdu(etag: &[u8], num: u32, more: bool, szx: u8, data: &[u8]) -> Pdu {
        let mut pdu = Pdu::new(
            MessageType::NonConfirmable,
            Code::CONTENT,
            MessageId(num as u16),
            Token::new(TOKEN.to_vec()),
        )
        .with_data(data.to_vec());
        pdu.add_option(OptionKey::ETag, etag.to_vec());
        pdu.set_block2(Block::new(num, more, szx).unwrap());
        pdu.set_option_uint(OptionKey::Size2, 4096);
        pdu
    }

    /// Feed 16-byte blocks followed by a final block carrying `tail`
    fn feed(assembler: &mut BlockAssembler, blocks: &[[u8; 16]], tail: &[u8]) -> BlockCheck {
        for (num, chunk) in blocks.iter().enumerate() {
            assembler.check_block(&block_pdu(b"e1", num as u32, true, 0, chunk));
        }
        assembler.check_block(&block_pdu(b"e1", blocks.len() as u32, false, 0, tail))
    }

    fn key(etag: &[u8]) -> BlockKey {
        BlockKey {
            etag: Etag::new(etag.to_vec()),
            token: Token::new(TOKEN.to_vec()),
        }
    }

    #[test]
    fn response_without_block_options_is_not_blockwise() {
        let mut assembler = BlockAssembler::default();
        let pdu = Pdu::new(
            MessageType::Acknowledgement,
            Code::CONTENT,
            MessageId(1),
            Token::new(TOKEN.to_vec()),
        );
        assert_eq!(assembler.check_block(&pdu), BlockCheck::not_blockwise());

        let mut no_etag = pdu.clone();
        no_etag.set_block2(Block::new(0, true, 2).unwrap());
        no_etag.set_option_uint(OptionKey::Size2, 100);
        assert_eq!(assembler.check_block(&no_etag), BlockCheck::not_blockwise());
        assert!(assembler.is_empty());
    }

    #[test]
    fn blocks_are_concatenated_in_order() {
        let mut assembler = BlockAssembler::default();

        let first = assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[b'a'; 16]));
        assert!(first.more_blocks);
        assert_eq!(first.block, Some(Block::new(1, false, 0).unwrap()));
        assert_eq!(assembler.len(), 1);

        let second = assembler.check_block(&block_pdu(b"e1", 1, true, 0, &[b'b'; 16]));
        assert_eq!(second.block, Some(Block::new(2, false, 0).unwrap()));

        let last = assembler.check_block(&block_pdu(b"e1", 2, false, 0, b"cc"));
        assert!(!last.more_blocks);
        assert_eq!(last.etag, Some(Etag::new(b"e1".to_vec())));

        let mut expected = vec![b'a'; 16];
        expected.extend_from_slice(&[b'b'; 16]);
        expected.extend_from_slice(b"cc");
        assert_eq!(last.assembled.unwrap().data, expected);
        assert!(assembler.is_empty());
    }

    #[test]
    fn duplicate_block_is_not_appended_twice() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[b'a'; 16]));
        assembler.check_block(&block_pdu(b"e1", 1, true, 0, &[b'b'; 16]));

        let again = assembler.check_block(&block_pdu(b"e1", 1, true, 0, &[b'b'; 16]));
        assert!(again.more_blocks);
        assert_eq!(again.block, Some(Block::new(2, false, 0).unwrap()));

        let zero_again = assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[b'a'; 16]));
        assert_eq!(zero_again.block, Some(Block::new(1, false, 0).unwrap()));
        let one = assembler.check_block(&block_pdu(b"e1", 1, true, 0, &[b'b'; 16]));
        assert_eq!(one.block, Some(Block::new(2, false, 0).unwrap()));

        let last = assembler.check_block(&block_pdu(b"e1", 2, false, 0, b"cc"));
        assert_eq!(last.assembled.unwrap().data.len(), 34);
    }

    #[test]
    fn gap_in_sequence_restarts_from_zero() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[b'a'; 16]));

        let skipped = assembler.check_block(&block_pdu(b"e1", 2, true, 0, &[b'c'; 16]));
        assert_eq!(skipped.block, Some(Block::new(0, false, 0).unwrap()));
        assert!(assembler.is_empty());
    }

    #[test]
    fn continuation_with_unknown_etag_discards_stale_buffer() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"e1", 0, true, 2, &[0; 64]));
        assert!(assembler.contains(&key(b"e1")));

        let check = assembler.check_block(&block_pdu(b"e2", 1, true, 2, &[1; 64]));
        assert!(check.more_blocks);
        assert_eq!(check.block.unwrap().num, 0);
        assert!(check.assembled.is_none());
        assert!(!assembler.contains(&key(b"e1")));
        assert!(assembler.is_empty());
    }

    #[test]
    fn new_etag_on_first_block_replaces_old_transfer() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"old", 0, true, 0, &[0; 16]));
        assembler.check_block(&block_pdu(b"new", 0, true, 0, &[1; 16]));
        assert_eq!(assembler.len(), 1);
        assert!(assembler.contains(&key(b"new")));

        assembler.check_block(&block_pdu(b"newer", 0, false, 0, b"whole"));
        assert!(assembler.is_empty());
    }

    #[test]
    fn orphan_last_block_restarts_from_zero() {
        let mut assembler = BlockAssembler::default();
        let check = assembler.check_block(&block_pdu(b"e1", 3, false, 2, b"tail"));
        assert!(check.more_blocks);
        assert_eq!(check.block, Some(Block::new(0, false, 2).unwrap()));
        assert!(check.assembled.is_none());
    }

    #[test]
    fn single_last_block_is_complete() {
        let mut assembler = BlockAssembler::default();
        let check = assembler.check_block(&block_pdu(b"e1", 0, false, 6, b"whole"));
        assert!(!check.more_blocks);
        assert_eq!(check.assembled.unwrap().data, b"whole".to_vec());
    }

    #[test]
    fn discard_token_drops_every_etag() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[0; 16]));
        assert_eq!(assembler.discard_token(&Token::new(TOKEN.to_vec())), 1);
        assert_eq!(assembler.discard_token(&Token::new(TOKEN.to_vec())), 0);
        assert!(assembler.is_empty());
    }

    #[test]
    fn second_request_size_rescales_block_number() {
        let mut assembler = BlockAssembler::new(BlockSizeConfig {
            initial_request_block_size: None,
            second_request_block_size: Some(2),
        });
        let check = assembler.check_block(&block_pdu(b"e1", 0, true, 4, &[0; 256]));
        // 256 bytes received, next request is block 4 of 64 bytes
        assert_eq!(check.block, Some(Block::new(4, false, 2).unwrap()));

        let next = assembler.check_block(&block_pdu(b"e1", 4, false, 2, &[1; 10]));
        assert_eq!(next.assembled.unwrap().data.len(), 266);
    }

    #[test]
    fn larger_second_request_size_is_ignored() {
        let mut assembler = BlockAssembler::new(BlockSizeConfig {
            initial_request_block_size: None,
            second_request_block_size: Some(5),
        });
        let check = assembler.check_block(&block_pdu(b"e1", 0, true, 3, &[0; 128]));
        assert_eq!(check.block, Some(Block::new(1, false, 3).unwrap()));
    }

    #[test]
    fn initial_request_size_keeps_server_size() {
        let mut assembler = BlockAssembler::new(BlockSizeConfig {
            initial_request_block_size: Some(1),
            second_request_block_size: Some(0),
        });
        let check = assembler.check_block(&block_pdu(b"e1", 0, true, 4, &[0; 256]));
        assert_eq!(check.block, Some(Block::new(1, false, 4).unwrap()));
    }

    #[test]
    fn replay_from_block_zero_is_idempotent() {
        let blocks = [[b'0'; 16], [b'1'; 16]];
        let mut assembler = BlockAssembler::default();

        let first = feed(&mut assembler, &blocks, b"89");
        let second = feed(&mut assembler, &blocks, b"89");
        assert_eq!(first, second);
        assert!(assembler.is_empty());
    }

    #[test]
    fn first_block_replaces_stale_partial_buffer() {
        let mut assembler = BlockAssembler::default();
        assembler.check_block(&block_pdu(b"e1", 0, true, 0, &[b'o'; 16]));
        assembler.check_block(&block_pdu(b"e1", 1, true, 0, &[b'o'; 16]));

        let check = feed(&mut assembler, &[[b'n'; 16]], b"end");
        let mut expected = vec![b'n'; 16];
        expected.extend_from_slice(b"end");
        assert_eq!(check.assembled.unwrap().data, expected);
    }

    proptest! {
        #[test]
        fn reassembly_concatenates_all_payloads(
            blocks in prop::collection::vec(prop::array::uniform16(any::<u8>()), 0..8),
            tail in prop::collection::vec(any::<u8>(), 0..16)
        ) {
            let mut assembler = BlockAssembler::default();
            let check = feed(&mut assembler, &blocks, &tail);

            prop_assert!(!check.more_blocks);
            let assembled = check.assembled.unwrap();
            let mut expected = blocks.concat();
            expected.extend_from_slice(&tail);
            prop_assert_eq!(assembled.data, expected);
            prop_assert!(assembler.is_empty());
        }
    }
}
