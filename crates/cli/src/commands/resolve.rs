use bytes::Bytes;
use domain::base::Rtype;
use tdns_api::ResolveResult;

use super::Runtime;

#[derive(Clone, Debug, clap::Args)]
pub struct Resolve {
    /// The name to resolve.
    #[arg(value_name = "NAME")]
    qname: String,

    /// The record type to query for.
    #[arg(value_name = "TYPE", default_value = "A")]
    qtype: Rtype,
}

impl Resolve {
    pub async fn execute(self, runtime: Runtime) -> Result<(), String> {
        let qname: domain::base::Name<Bytes> = self.qname.parse().map_err(|err| format!("invalid name '{}': {err}", self.qname))?;

        let result = runtime.resolver.resolve(&qname, self.qtype).await;
        let report = match result {
            Ok(rrset) => ResolveResult {
                qname: qname.clone(),
                qtype: self.qtype.to_string(),
                rcode: rrset.rcode.map(|r| r.to_string()).unwrap_or_else(|| "NOERROR".to_string()),
                validation: format!("{:?}", rrset.validation),
                answers: rrset.records.iter().map(|r| r.to_string()).collect(),
            },
            Err(err) => return Err(err.to_string()),
        };

        println!("; {} {}", report.qname, report.qtype);
        println!("; rcode: {}  validation: {}", report.rcode, report.validation);
        if report.answers.is_empty() {
            println!("; no records")
        } else {
            for answer in &report.answers {
                println!("{answer}")
            }
        }
        Ok(())
    }
}
