//! Query execution: typed materialization and pagination.
//!
//! Primary pagination follows the page locator until the server reports
//! done. Nested pagination drains child collections exactly one relation
//! level deep; anything deeper is left as delivered. No retries — fetch
//! failures propagate unmodified.

use tracing::debug;

use crate::composite::{BatchRequest, CompositeBatch};
use crate::describe::SObjectType;
use crate::error::SforceError;
use crate::object::SObject;
use crate::rest::{parse_page, Method, Rest};

/// Flat-batch sub-request cap; nested page fetches are chunked to it.
const BATCH_LIMIT: usize = 25;

/// How far past the primary result pages a query goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDepth {
    /// Follow only the primary result's locators.
    ParentOnly,
    /// Also drain child-collection pages, one relation level deep.
    AllPages,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Use the endpoint variant that includes archived and deleted rows.
    pub all_rows: bool,
    /// Fetch nested pages through the flat batch flavor, cutting round
    /// trips when many collections have pages outstanding.
    pub use_composite: bool,
    pub page_depth: PageDepth,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { all_rows: false, use_composite: false, page_depth: PageDepth::ParentOnly }
    }
}

impl Rest {
    /// Run a query and return the fully materialized result set, in
    /// server order.
    pub async fn query_objects(
        &self,
        sobject_type: &'static SObjectType,
        soql: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<SObject>, SforceError> {
        let mut page = self.query(soql, opts.all_rows).await?;
        let mut rows = std::mem::take(&mut page.records);
        while !page.done {
            let Some(locator) = page.next_records_url.clone() else {
                break;
            };
            page = self.query_more(&locator).await?;
            rows.extend(std::mem::take(&mut page.records));
        }
        debug!("query {}: {} rows", sobject_type.api_name, rows.len());

        let mut objects = rows
            .iter()
            .map(|row| SObject::from_row(sobject_type, row))
            .collect::<Result<Vec<_>, _>>()?;

        if opts.page_depth == PageDepth::AllPages {
            if opts.use_composite {
                self.drain_children_batched(&mut objects).await?;
            } else {
                self.drain_children(&mut objects).await?;
            }
        }
        Ok(objects)
    }

    /// Follow every unfinished child collection's locator to completion,
    /// one fetch at a time.
    async fn drain_children(&self, objects: &mut [SObject]) -> Result<(), SforceError> {
        for obj in objects.iter_mut() {
            for (related, children) in obj.unfinished_children_mut() {
                while !children.done {
                    let Some(locator) = children.next_records_url.clone() else {
                        break;
                    };
                    let page = self.query_more(&locator).await?;
                    for row in &page.records {
                        children.records.push(SObject::from_row(related, row)?);
                    }
                    children.done = page.done;
                    children.next_records_url = page.next_records_url;
                }
            }
        }
        Ok(())
    }

    /// Same as [`Self::drain_children`], but each round trip carries up to
    /// [`BATCH_LIMIT`] locator fetches. The collections are independent of
    /// one another, so their fetches can share a call; pages of one
    /// collection still arrive in order across rounds.
    async fn drain_children_batched(&self, objects: &mut [SObject]) -> Result<(), SforceError> {
        loop {
            let mut pending = Vec::new();
            for obj in objects.iter_mut() {
                pending.extend(obj.unfinished_children_mut());
            }
            pending.retain(|(_, children)| children.next_records_url.is_some());
            if pending.is_empty() {
                return Ok(());
            }
            debug!("draining {} nested collections via batch", pending.len());

            for chunk in pending.chunks_mut(BATCH_LIMIT) {
                let mut batch = CompositeBatch::new(self);
                for (_, children) in chunk.iter() {
                    if let Some(locator) = &children.next_records_url {
                        batch.add_request(
                            BatchRequest {
                                method: Method::Get,
                                url: locator.clone(),
                                rich_input: None,
                            },
                            None,
                        );
                    }
                }
                let response = batch.send().await?;
                for ((related, children), sub) in chunk.iter_mut().zip(response.results) {
                    let page = parse_page(sub.result)?;
                    for row in &page.records {
                        children.records.push(SObject::from_row(*related, row)?);
                    }
                    children.done = page.done;
                    children.next_records_url = page.next_records_url;
                }
            }
        }
    }
}
