//! cloudformation building blocks. Each `add_*` function pushes one or
//! more resources into a [`StackInput`](crate::stack::StackInput) and
//! hands back a handle that later resources reference it through.

mod hosted_zone;
pub use hosted_zone::*;
mod certificate;
pub use certificate::*;
mod s3_bucket;
pub use s3_bucket::*;
mod lambda;
pub use lambda::*;
mod cloudfront;
pub use cloudfront::*;
mod api_gateway;
pub use api_gateway::*;
mod route53;
pub use route53::*;

// higher level resources:
mod static_website;
pub use static_website::*;
