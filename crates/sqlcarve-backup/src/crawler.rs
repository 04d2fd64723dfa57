//! Depth-first B-tree traversal with a guest visitor.
//!
//! [`crawl_tree`] drives the walk; a [`PageVisitor`] decides, page by
//! page, whether to go deeper. Heights are counted from the tree's root
//! (root = 0), so they are local to one walk and mean nothing across
//! trees.
//!
//! The walk must terminate on arbitrary garbage. Two guards enforce
//! that: a page reached twice within one tree ends the walk as
//! corrupted, as does a tree deeper than [`MAX_CRAWL_DEPTH`]. Neither is
//! reachable from a well-formed database.

use std::collections::HashSet;

use sqlcarve_error::Result;
use sqlcarve_pager::{LeafCell, Page, Pager};
use sqlcarve_types::PageNumber;
use tracing::trace;

/// Deepest tree the crawler will follow before calling it damaged.
pub const MAX_CRAWL_DEPTH: u32 = 20;

/// What the visitor wants done with the page it was just shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    /// Follow children of an interior page, or surface a leaf's cells.
    Descend,
    /// Nothing further on this page.
    Skip,
}

/// How a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The walk reached everything the visitor asked for.
    Completed,
    /// The tree is structurally damaged; the walk stopped early.
    Corrupted { detail: String },
}

impl CrawlOutcome {
    #[must_use]
    pub const fn is_corrupted(&self) -> bool {
        matches!(self, Self::Corrupted { .. })
    }
}

/// Observer of one tree walk.
pub trait PageVisitor {
    /// Called once per reached page with its height below the root.
    fn visit_page(&mut self, page: &Page, height: u32) -> Result<PageAction>;

    /// Called for each cell of a leaf the visitor descended into, in
    /// page order. The pager is lent back so the visitor can start a
    /// nested walk from here.
    fn visit_cell(&mut self, pager: &mut Pager, page: &Page, cell: &LeafCell) -> Result<()>;
}

/// Walk the tree rooted at `root`, depth first, children in order.
///
/// Failing to fetch or parse a page is an error and ends the walk; so is
/// an error from the visitor. An invalid child pointer under a page the
/// visitor descended into ends the walk as [`CrawlOutcome::Corrupted`]
/// instead, leaving the severity to the caller.
pub fn crawl_tree<V: PageVisitor>(
    pager: &mut Pager,
    root: PageNumber,
    visitor: &mut V,
) -> Result<CrawlOutcome> {
    let mut stack: Vec<(PageNumber, u32)> = vec![(root, 0)];
    let mut visited: HashSet<PageNumber> = HashSet::new();

    while let Some((number, height)) = stack.pop() {
        if height >= MAX_CRAWL_DEPTH {
            return Ok(CrawlOutcome::Corrupted {
                detail: format!("tree deeper than {MAX_CRAWL_DEPTH} levels at page {number}"),
            });
        }
        if !visited.insert(number) {
            return Ok(CrawlOutcome::Corrupted {
                detail: format!("page {number} reached twice in one tree"),
            });
        }

        let page = pager.acquire(number)?;
        trace!(page = number.get(), height, kind = ?page.kind(), "visiting page");
        match visitor.visit_page(&page, height)? {
            PageAction::Skip => {}
            PageAction::Descend if page.kind().is_interior() => {
                // Push in reverse so children pop left to right.
                for index in (0..page.child_count()).rev() {
                    let Some(child) = page.child(index) else {
                        return Ok(CrawlOutcome::Corrupted {
                            detail: format!("invalid child pointer {index} on page {number}"),
                        });
                    };
                    stack.push((child, height + 1));
                }
            }
            PageAction::Descend => {
                for index in 0..page.cell_count() {
                    let cell = pager.leaf_cell(&page, index)?;
                    visitor.visit_cell(pager, &page, &cell)?;
                }
            }
        }
    }
    Ok(CrawlOutcome::Completed)
}
